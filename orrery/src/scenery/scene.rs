use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::SceneError;
use crate::job::JobRequest;
use crate::trace::{debug, warn};

/// Scene description file inside each scene directory.
pub const SCENE_FILE: &str = "scene.toml";

/// Geographic position the observer is moved to when the scene loads.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SceneLocation {
    /// Degrees, north positive.
    pub latitude: f64,
    /// Degrees, east positive.
    pub longitude: f64,
    /// Metres above sea level.
    #[serde(default)]
    pub altitude: f64,
}

/// Initial view direction and field of view, all in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LookAt {
    pub azimuth: f64,
    pub altitude: f64,
    pub fov: f64,
}

/// Metadata of one scene. Doubles as the background load request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SceneInfo {
    /// Directory name; filled in by the catalog.
    #[serde(skip)]
    pub id: String,
    /// Scene directory; filled in by the catalog.
    #[serde(skip)]
    pub dir: PathBuf,
    pub name: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Landscape to switch to alongside the model.
    #[serde(default)]
    pub landscape: Option<String>,
    /// Model file, relative to the scene directory.
    pub model_file: PathBuf,
    #[serde(default)]
    pub location: Option<SceneLocation>,
    #[serde(default)]
    pub look_at: Option<LookAt>,
}

impl SceneInfo {
    #[must_use]
    pub fn model_path(&self) -> PathBuf {
        self.dir.join(&self.model_file)
    }
}

impl JobRequest for SceneInfo {
    fn label(&self) -> String {
        format!("Loading scene '{}'", self.name)
    }
}

/// Directory-backed list of available scenes.
#[derive(Debug, Clone)]
pub struct SceneCatalog {
    root: PathBuf,
}

impl SceneCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reads `<root>/<id>/scene.toml`.
    ///
    /// # Errors
    ///
    /// [`SceneError::NotFound`] if the directory or file does not exist,
    /// otherwise read and parse errors.
    pub fn load_by_id(&self, id: &str) -> Result<SceneInfo, SceneError> {
        if id.is_empty() || id.contains(['/', '\\']) || id == "." || id == ".." {
            return Err(SceneError::NotFound(id.to_string()));
        }
        let dir = self.root.join(id);
        let path = dir.join(SCENE_FILE);
        if !path.is_file() {
            return Err(SceneError::NotFound(id.to_string()));
        }
        let contents = fs::read_to_string(&path).map_err(|source| SceneError::Io {
            path: path.clone(),
            source,
        })?;
        let mut info: SceneInfo =
            toml::from_str(&contents).map_err(|source| SceneError::Parse { path, source })?;
        info.id = id.to_string();
        info.dir = dir;
        debug!(id, name = %info.name, "scene info loaded");
        Ok(info)
    }

    /// Every scene with a readable description, sorted by id. Broken scenes
    /// are logged and left out.
    ///
    /// # Errors
    ///
    /// The root directory cannot be listed.
    pub fn list(&self) -> Result<Vec<SceneInfo>, SceneError> {
        let entries = fs::read_dir(&self.root).map_err(|source| SceneError::Io {
            path: self.root.clone(),
            source,
        })?;
        let mut scenes = Vec::new();
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let Some(id) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            match self.load_by_id(&id) {
                Ok(info) => scenes.push(info),
                Err(SceneError::NotFound(_)) => {}
                Err(e) => {
                    warn!(id = %id, error = %e, "skipping unreadable scene");
                }
            }
        }
        scenes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(scenes)
    }

    /// Id of the scene whose display name is `name`.
    ///
    /// # Errors
    ///
    /// [`SceneError::UnknownName`], or listing errors.
    pub fn id_from_name(&self, name: &str) -> Result<String, SceneError> {
        self.list()?
            .into_iter()
            .find(|info| info.name == name)
            .map(|info| info.id)
            .ok_or_else(|| SceneError::UnknownName(name.to_string()))
    }
}
