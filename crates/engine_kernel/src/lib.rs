//! # engine_kernel
//!
//! The scheduling kernel: an incremental entity/component index plus a
//! dependency-ordered, variable-rate system loop.
//!
//! - [`EcsManager`] — owns the [`World`], the groups and the systems.
//! - [`System`] — filter, tick rate, dependencies, async lifecycle and the
//!   synchronous per-frame [`System::on_loop`].
//! - [`Group`] — the entities eligible for one filter, with their matched
//!   components in filter order.
//! - [`Commands`] — structural changes queued from inside a frame.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use engine_component::Filter;
//! use engine_kernel::{EcsManager, KernelConfig, System, SystemContext};
//!
//! struct Spawner;
//!
//! impl System for Spawner {
//!     fn filter(&self) -> Filter {
//!         Filter::new()
//!     }
//!
//!     fn on_loop(&mut self, ctx: &mut SystemContext<'_>) {
//!         if ctx.rows.len() < 10 {
//!             ctx.commands.create_entity("spawned");
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut manager = EcsManager::new(KernelConfig::new().with_max_frames(60));
//!     manager.add_system(Spawner)?;
//!     manager.run(std::future::pending()).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod group;
pub mod manager;
pub mod registry;
pub mod scheduler;
pub mod system;
pub mod world;

pub use config::KernelConfig;
pub use context::{Command, Commands, SystemContext};
pub use error::KernelError;
pub use group::{Group, GroupRow};
pub use manager::EcsManager;
pub use registry::SystemSlot;
pub use system::{AsAny, System, SystemId};
pub use world::World;

/// Re-exported so system implementations can use `#[engine_kernel::async_trait]`.
pub use async_trait::async_trait;
