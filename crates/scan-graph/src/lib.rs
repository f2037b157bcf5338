//! Intermediate control/data-flow graphs of unit bodies.
//!
//! [`GraphBuilder`] turns one [`UnitDescriptor`](invariant_scan_types::UnitDescriptor)
//! into a [`Graph`]. Graphs are built fresh per unit, handed to the
//! verification phases by shared reference and dropped afterwards.
//!
//! ## Graph Model
//!
//! - [`Node`] / [`NodeKind`] - Control nodes (`Start`, `If`, `Merge`, ...) and value nodes
//! - [`Edge`] / [`EdgeKind`] - Control successor order and producer-to-consumer data flow
//! - [`Stamp`] - Inferred value type of a node; phi stamps are solved before `build` returns
//!
//! ## Errors
//!
//! - [`BuildError`] - Malformed bodies are reported, bailouts and linkage failures are not

pub mod builder;
pub mod error;
pub mod graph;
pub mod stamp;

pub use builder::{BuilderOptions, GraphBuilder};
pub use error::{BuildError, MalformedReason};
pub use graph::{ConstValue, Edge, EdgeKind, Graph, Node, NodeId, NodeKind};
pub use stamp::{ObjectStamp, Stamp, ValueKind};
