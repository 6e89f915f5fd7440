//! Data Models
//!
//! This module contains the value-level building blocks of the engine:
//!
//! - `Value` / `ValueKind` - the tagged union property slots store
//! - `PropertyMessage` / `RuleId` - validation messages and their rule tags
//! - `Blueprint` / `PropertyDef` - the frozen per-type definition
//! - `ChangeEvent` / `MetaSnapshot` - change notifications and the cascade
//!   snapshot
//!
//! Everything here is passive data; the runtime behavior lives in
//! [`crate::engine`].

mod blueprint;
mod event;
mod message;
mod value;

pub use blueprint::{Blueprint, BlueprintBuilder, PropertyDef};
pub use event::{ChangeEvent, ChangeReason, MetaSnapshot};
pub use message::{PropertyMessage, RuleId, WAIT_CANCELLED_RULE, WAIT_CANCELLED_TEXT};
pub use value::{FromValue, Value, ValueKind};
