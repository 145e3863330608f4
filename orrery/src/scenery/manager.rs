use std::cell::RefCell;
use std::rc::Rc;

use super::SceneError;
use super::model::{SceneModel, load_model};
use super::scene::{LookAt, SceneCatalog, SceneInfo, SceneLocation};
use crate::job::{JobCoordinator, JobError, JobEvent, JobId, Progress};
use crate::trace::{error, info, warn};

pub const MSG_LOADING: &str = "Loading scene. Please be patient!";
pub const MSG_LOADED: &str = "Scene successfully loaded";
pub const MSG_LOAD_FAILED: &str = "Could not load scene, please check log for error messages!";
pub const MSG_SCENE_INFO_FAILED: &str =
    "Could not load scene info, please check log for error messages!";
pub const MSG_LOAD_FIRST: &str = "Please load a scene first!";

/// Observer placement taken from the last loaded scene.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ObserverPose {
    pub location: Option<SceneLocation>,
    pub look_at: Option<LookAt>,
}

/// Control-thread state touched by the finalize step and the observer.
#[derive(Debug, Default)]
struct SceneryState {
    current: Option<(SceneInfo, SceneModel)>,
    landscape: Option<String>,
    pose: ObserverPose,
    enabled: bool,
    message: Option<String>,
    progress: Option<Progress>,
}

/// Loads scenes in the background and keeps the current one.
///
/// All methods are for the control thread. Call [`update`](Self::update)
/// once per iteration of the control loop.
pub struct SceneryManager {
    catalog: SceneCatalog,
    jobs: JobCoordinator<SceneInfo, SceneModel>,
    state: Rc<RefCell<SceneryState>>,
    default_scene_id: Option<String>,
}

impl SceneryManager {
    pub fn new(catalog: SceneCatalog) -> Self {
        let state = Rc::new(RefCell::new(SceneryState::default()));

        let installed = Rc::clone(&state);
        let mut jobs = JobCoordinator::new(load_model).with_finalizer(
            move |scene: &SceneInfo, model: &mut SceneModel| -> Result<(), JobError> {
                let mut state = installed.borrow_mut();
                state.landscape.clone_from(&scene.landscape);
                state.pose = ObserverPose {
                    location: scene.location,
                    look_at: scene.look_at,
                };
                state.current = Some((scene.clone(), model.clone()));
                Ok(())
            },
        );

        let observed = Rc::clone(&state);
        jobs.observe(move |event: &JobEvent<'_, SceneInfo, SceneModel>| {
            let mut state = observed.borrow_mut();
            match event {
                JobEvent::Started { .. } => {
                    state.message = Some(MSG_LOADING.to_string());
                    state.progress = None;
                }
                JobEvent::Progress { progress, .. } => {
                    state.progress = Some((*progress).clone());
                }
                JobEvent::Succeeded { request, .. } => {
                    info!(scene = %request.id, "scene successfully loaded");
                    state.message = Some(MSG_LOADED.to_string());
                    state.progress = None;
                    state.enabled = true;
                }
                JobEvent::Failed { request, error, .. } => {
                    state.progress = None;
                    if error.is_cancelled() {
                        state.message = None;
                    } else {
                        error!(scene = %request.id, %error, "could not load scene");
                        state.message = Some(MSG_LOAD_FAILED.to_string());
                    }
                }
            }
        });

        Self {
            catalog,
            jobs,
            state,
            default_scene_id: None,
        }
    }

    #[must_use]
    pub const fn catalog(&self) -> &SceneCatalog {
        &self.catalog
    }

    /// Starts loading `scene`, cancelling a load in progress.
    pub fn load_scene(&mut self, scene: SceneInfo) -> JobId {
        info!(scene = %scene.id, name = %scene.name, "loading scene");
        self.jobs.submit(scene)
    }

    /// # Errors
    ///
    /// The scene description could not be read. The status message is set.
    pub fn load_by_id(&mut self, id: &str) -> Result<JobId, SceneError> {
        match self.catalog.load_by_id(id) {
            Ok(scene) => Ok(self.load_scene(scene)),
            Err(e) => {
                error!(id, error = %e, "could not load scene info");
                self.show_message(MSG_SCENE_INFO_FAILED);
                Err(e)
            }
        }
    }

    /// # Errors
    ///
    /// No scene carries that name, or its description is unreadable.
    pub fn load_by_name(&mut self, name: &str) -> Result<JobId, SceneError> {
        let id = match self.catalog.id_from_name(name) {
            Ok(id) => id,
            Err(e) => {
                warn!(name, error = %e, "scene name lookup failed");
                self.show_message(&format!("Could not find scene ID for {name}"));
                return Err(e);
            }
        };
        self.load_by_id(&id)
    }

    pub fn set_default_scene_id(&mut self, id: impl Into<String>) {
        self.default_scene_id = Some(id.into());
    }

    #[must_use]
    pub fn default_scene_id(&self) -> Option<&str> {
        self.default_scene_id.as_deref()
    }

    /// Shows or hides the scene.
    ///
    /// Enabling with nothing loaded starts loading the default scene, and
    /// the scene is shown once that load succeeds. Without a default the
    /// scene stays hidden and the user is asked to load one. Returns whether
    /// the scene is shown now.
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        if !enabled {
            self.state.borrow_mut().enabled = false;
            return false;
        }
        if self.state.borrow().current.is_some() {
            self.state.borrow_mut().enabled = true;
            return true;
        }
        match self.default_scene_id.clone() {
            Some(id) => {
                if !self.jobs.is_busy() {
                    // failures already set the status message
                    let _ = self.load_by_id(&id);
                }
            }
            None => self.show_message(MSG_LOAD_FIRST),
        }
        false
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state.borrow().enabled
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.jobs.is_busy()
    }

    /// Scene being loaded right now.
    #[must_use]
    pub fn loading_scene(&self) -> Option<&SceneInfo> {
        self.jobs.active_request()
    }

    #[must_use]
    pub fn current_scene(&self) -> Option<SceneInfo> {
        self.state.borrow().current.as_ref().map(|(scene, _)| scene.clone())
    }

    #[must_use]
    pub fn current_model(&self) -> Option<SceneModel> {
        self.state.borrow().current.as_ref().map(|(_, model)| model.clone())
    }

    /// Landscape requested by the current scene.
    #[must_use]
    pub fn landscape(&self) -> Option<String> {
        self.state.borrow().landscape.clone()
    }

    #[must_use]
    pub fn observer_pose(&self) -> ObserverPose {
        self.state.borrow().pose
    }

    /// User-facing status line.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        self.state.borrow().message.clone()
    }

    pub fn clear_message(&mut self) {
        self.state.borrow_mut().message = None;
    }

    #[must_use]
    pub fn progress(&self) -> Option<Progress> {
        self.state.borrow().progress.clone()
    }

    /// Delivers progress and completion of the background load. Returns
    /// `true` if a load finished.
    pub fn update(&mut self) -> bool {
        self.jobs.poll()
    }

    /// Aborts the load in progress and waits for the worker to exit.
    pub fn cancel_loading(&mut self) -> bool {
        self.jobs.cancel()
    }

    /// Blocks until the load in progress completes.
    pub fn wait(&mut self) -> bool {
        self.jobs.wait()
    }

    fn show_message(&self, message: &str) {
        self.state.borrow_mut().message = Some(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn write_scene(root: &Path, id: &str, name: &str, model: Option<&str>) {
        let dir = root.join(id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("scene.toml"),
            format!(
                "name = \"{name}\"\nlandscape = \"{id}\"\nmodel_file = \"model.obj\"\n\
                 [location]\nlatitude = 47.0\nlongitude = 15.4\n"
            ),
        )
        .unwrap();
        if let Some(model) = model {
            fs::write(dir.join("model.obj"), model).unwrap();
        }
    }

    #[test]
    fn loads_scene_and_installs_it() {
        let root = tempfile::tempdir().unwrap();
        write_scene(root.path(), "garden", "Garden", Some("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n"));
        let mut scenery = SceneryManager::new(SceneCatalog::new(root.path()));

        scenery.load_by_id("garden").unwrap();
        assert_eq!(scenery.message().as_deref(), Some(MSG_LOADING));
        assert!(scenery.wait());

        assert_eq!(scenery.message().as_deref(), Some(MSG_LOADED));
        assert_eq!(scenery.current_scene().unwrap().id, "garden");
        assert_eq!(scenery.current_model().unwrap().faces, 1);
        assert_eq!(scenery.landscape().as_deref(), Some("garden"));
        assert_eq!(scenery.observer_pose().location.unwrap().latitude, 47.0);
        assert!(scenery.is_enabled());
    }

    #[test]
    fn missing_model_reports_failure() {
        let root = tempfile::tempdir().unwrap();
        write_scene(root.path(), "empty", "Empty", None);
        let mut scenery = SceneryManager::new(SceneCatalog::new(root.path()));

        scenery.load_by_id("empty").unwrap();
        scenery.wait();
        assert_eq!(scenery.message().as_deref(), Some(MSG_LOAD_FAILED));
        assert!(scenery.current_scene().is_none());
        assert!(!scenery.is_enabled());
    }

    #[test]
    fn unknown_scene_messages() {
        let root = tempfile::tempdir().unwrap();
        let mut scenery = SceneryManager::new(SceneCatalog::new(root.path()));

        assert!(scenery.load_by_id("nowhere").is_err());
        assert_eq!(scenery.message().as_deref(), Some(MSG_SCENE_INFO_FAILED));

        assert!(scenery.load_by_name("Atlantis").is_err());
        assert_eq!(
            scenery.message().as_deref(),
            Some("Could not find scene ID for Atlantis")
        );
        assert!(!scenery.is_loading());
    }

    #[test]
    fn enabling_without_scene() {
        let root = tempfile::tempdir().unwrap();
        write_scene(root.path(), "garden", "Garden", Some("v 0 0 0\n"));
        let mut scenery = SceneryManager::new(SceneCatalog::new(root.path()));

        assert!(!scenery.set_enabled(true));
        assert_eq!(scenery.message().as_deref(), Some(MSG_LOAD_FIRST));
        assert!(!scenery.is_loading());

        scenery.set_default_scene_id("garden");
        assert!(!scenery.set_enabled(true));
        assert!(scenery.is_loading());
        scenery.wait();
        assert!(scenery.is_enabled());

        assert!(!scenery.set_enabled(false));
        assert!(scenery.set_enabled(true));
    }
}
