//! Component lifecycle: the `Component` contract, the `Context` registry of
//! started components, and the `Application` composition root.

pub mod application;
pub mod component;
pub mod context;

pub use application::{shutdown_signal, Application, ApplicationBuilder, Declaration};
pub use component::{Component, ComponentHandle, LifecycleState, StateCell};
pub use context::{Context, LifecycleError};
