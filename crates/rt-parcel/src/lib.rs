// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The parcel model and action registry.
//!
//! A [`Parcel`] is an owned descriptor for one action invocation, carrying
//! enough information — target, action, continuation, payload — to be
//! either executed locally or forwarded over a transport. An
//! [`ActionRegistry`] maps action names to [`ActionEntry`] records and
//! provides the (attribute-driven) logic for invoking their handlers
//! against a parcel.

mod action;
mod error;
mod parcel;
mod payload;

pub use action::{
    ActionAttrs, ActionEntry, ActionId, ActionRegistry, Handler, InvokeStatus, ACTION_LCO_SET,
};
pub use error::{Error, Result};
pub use parcel::{Parcel, ProcessId};
pub use payload::Payload;
