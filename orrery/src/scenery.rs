//! 3D scenery loading on the background job coordinator.
//!
//! Scenes live in one directory each under the configured scene root:
//!
//! ```text
//!   scenes/
//!     sterngarten/
//!       scene.toml        name, landscape, model file, location, view
//!       sterngarten.obj   Wavefront model, parsed on the worker thread
//! ```
//!
//! [`SceneryManager`] owns the coordinator. Model parsing runs on the worker;
//! installing the scene and moving the observer happen in the finalize step
//! on the control thread.

mod manager;
mod model;
mod scene;

use std::path::PathBuf;

use thiserror::Error;

pub use manager::{
    ObserverPose, SceneryManager, MSG_LOADING, MSG_LOAD_FAILED, MSG_LOAD_FIRST, MSG_LOADED,
    MSG_SCENE_INFO_FAILED,
};
pub use model::{Bounds, SceneModel, load_model, parse_obj};
pub use scene::{LookAt, SceneCatalog, SceneInfo, SceneLocation, SCENE_FILE};

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid scene description {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("scene '{0}' not found")]
    NotFound(String),

    #[error("no scene named '{0}'")]
    UnknownName(String),

    #[error("{path}:{line}: {reason}")]
    Model {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}
