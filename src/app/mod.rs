// ABOUTME: App module - sequences startup, serving and shutdown of the proxy.
// ABOUTME: Publishes lifecycle state over a watch channel.

mod lifecycle;

pub use lifecycle::{Application, LifecycleState, StartupPolicy};
