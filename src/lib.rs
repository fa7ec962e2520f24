pub mod canvas;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod geometry;
pub mod graph;
pub mod hash;
pub mod layout;
pub mod mutation;
pub mod render;
pub mod routing;
pub mod scheduler;
pub mod snapshot;
pub mod validate;
pub mod view_state;

pub use canvas::{Canvas, GraphRevision};
#[cfg(feature = "cli")]
pub use cli::run;
pub use config::{Config, LayoutConfig, RoutingConfig, load_config};
pub use error::{Error, Result};
pub use graph::{DomainEdge, DomainGraph, DomainNode, ROOT_ID};
pub use hash::{StructuralHash, structural_hash};
pub use mutation::{NodeData, Operation};
pub use render::{RenderAdapter, RenderMode, RenderScene, Viewport};
pub use routing::{EdgeRouter, RegionChange, RoutingReport};
pub use scheduler::{CommitMode, LayoutOutcome, LayoutScheduler};
pub use snapshot::Snapshot;
pub use view_state::{GeometryKind, ViewState};
