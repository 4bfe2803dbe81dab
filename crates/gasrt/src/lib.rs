// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `gasrt`: the locality singleton and public API surface of spec §6,
//! wiring `rt-gas`, `rt-parcel`, `rt-sched`, `rt-lco`, and `rt-net` into one
//! running process.
//!
//! Spec §9 sanctions exactly one process-wide singleton, the locality:
//! `rt_lco::LcoRuntime` is already built that way, and [`Builder`]/[`init`]
//! follow the same shape — construct once, panic on a second call. One OS
//! process is one locality; a multi-rank run is one process per rank,
//! connected by [`rt_net::TcpTransport`] (see `boot`/`transport` in
//! [`config`]).
//!
//! `rt-lco`'s blocking operations (`wait`/`get`/...) may only be called
//! from inside a running user thread — they park via `rt_sched::park`,
//! which panics outside one (see `rt_sched::user_thread`). [`run`] is
//! called from a plain `main()`, not a user thread, so it cannot block on
//! an LCO directly; instead the action it launches carries a continuation
//! into a dedicated, always-registered "run complete" action that signals a
//! `Condvar` this thread *can* wait on. Every other blocking entry point in
//! this crate (`collectives`, a demo's own handler) runs from inside an
//! action handler and is free to use `rt_lco` directly.

pub mod collectives;
pub mod config;
pub mod demos;
mod error;
pub mod gas;
mod logging;

pub use error::{Error, Result};
pub use rt_gas::GlobalAddr;
pub use rt_parcel::{ActionAttrs, ActionId, Handler, Parcel, ACTION_LCO_SET};

use config::Config;
use rt_gas::Gas;
use rt_net::{Dispatcher, ProgressHandle, SmpTransport, TcpTransport};
use rt_parcel::ActionRegistry;
use rt_sched::{Scheduler, Submit};
use std::sync::{Arc, Condvar, Mutex as StdMutex, OnceLock};

/// The name of the action every [`run`] call continues into. Registered by
/// every [`Builder`]; never overridable by application code.
const RUN_COMPLETE_ACTION: &str = "__gasrt-run-complete";

struct RunSlot {
    result: StdMutex<Option<Vec<u8>>>,
    cv: Condvar,
}

static RUN_SLOT: OnceLock<RunSlot> = OnceLock::new();

fn run_slot() -> &'static RunSlot {
    RUN_SLOT.get_or_init(|| RunSlot {
        result: StdMutex::new(None),
        cv: Condvar::new(),
    })
}

fn handle_run_complete(payload: &[u8]) -> Vec<u8> {
    let slot = run_slot();
    *slot.result.lock().unwrap() = Some(payload.to_vec());
    slot.cv.notify_all();
    Vec::new()
}

/// Registers application actions before the locality is finalized. Build
/// one with [`Builder::new`], [`Builder::register`] every action the demo
/// needs, then pass it to [`init`].
pub struct Builder {
    config: Config,
    registry: ActionRegistry,
    run_complete: rt_parcel::ActionId,
}

impl Builder {
    /// Starts a builder for `config`, pre-registering the actions `rt-lco`
    /// and this crate's own lifecycle need.
    ///
    /// # Panics
    ///
    /// Panics if `rt-lco`'s reserved action names collide with a
    /// previously-registered name — this can only happen if `Builder::new`
    /// itself is called twice against the same registry, which it never is.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let mut registry = ActionRegistry::new();
        rt_lco::LcoRuntime::install_actions(&mut registry)
            .expect("rt-lco action names are reserved and registered exactly once");
        let run_complete = registry
            .register(
                RUN_COMPLETE_ACTION,
                rt_parcel::Handler::Plain(handle_run_complete),
                rt_parcel::ActionAttrs::INTERRUPT,
            )
            .expect("the run-complete action name is reserved and registered exactly once");
        let mut builder = Self {
            config,
            registry,
            run_complete,
        };
        gas::register_actions(&mut builder);
        builder
    }

    /// Registers an application action. Must be called before [`init`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Action`] if `name` is already registered.
    pub fn register(
        &mut self,
        name: &'static str,
        handler: rt_parcel::Handler,
        attrs: rt_parcel::ActionAttrs,
    ) -> Result<rt_parcel::ActionId> {
        Ok(self.registry.register(name, handler, attrs)?)
    }
}

/// The running locality: everything [`init`] wires together, reached again
/// through [`run`]/[`finalize`]/the topology and collective functions.
pub(crate) struct Locality {
    pub(crate) config: Config,
    pub(crate) gas: Arc<Gas>,
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) registry: Arc<ActionRegistry>,
    run_complete: rt_parcel::ActionId,
    #[allow(dead_code)]
    progress: Option<ProgressHandle>,
}

static LOCALITY: OnceLock<Locality> = OnceLock::new();

pub(crate) fn locality() -> Result<&'static Locality> {
    LOCALITY.get().ok_or(Error::NotInitialized)
}

/// Finishes wiring `builder` into a running locality: binds the configured
/// transport, starts the worker pool, and installs `rt_lco::LcoRuntime`'s
/// process-wide singleton. Spec §6's `init(args) → status`.
///
/// # Errors
///
/// Returns [`Error::BootUnavailable`]/[`Error::TransportUnavailable`] if the
/// configuration named an external collaborator this workspace does not
/// implement, or [`Error::Io`] if binding the configured transport failed.
///
/// # Panics
///
/// Panics if called more than once in this process.
pub fn init(mut builder: Builder) -> Result<()> {
    logging::init(
        builder.config.log_level.as_deref(),
        builder.config.my_rank,
        &builder.config.log_at,
    );

    builder.registry.finalize();
    let registry = Arc::new(builder.registry);
    let config = builder.config;

    let gas = Arc::new(Gas::new(config.my_rank, config.ranks, config.heapsize));

    let dispatcher: Arc<Dispatcher> = if config.ranks <= 1 {
        let transport = SmpTransport::fabric(1).remove(0);
        Dispatcher::with_eager_limit(config.my_rank, gas.clone(), Arc::new(transport), config.eager_limit)
    } else {
        let transport = TcpTransport::bind(config.my_rank, config.peers.clone())?;
        Dispatcher::with_eager_limit(config.my_rank, gas.clone(), transport, config.eager_limit)
    };

    let scheduler = Arc::new(Scheduler::new(
        config.workers,
        config.stack_bytes,
        config.backoff_max,
        registry.clone(),
        gas.clone(),
        dispatcher.clone() as Arc<dyn rt_sched::Submit>,
    ));
    dispatcher.attach_scheduler(scheduler.clone());

    rt_lco::LcoRuntime::init(
        gas.clone(),
        scheduler.wake_queue(),
        dispatcher.clone() as Arc<dyn rt_sched::Submit>,
        registry.clone(),
    );

    // A single-rank locality has no peer that could ever reach this
    // process, so no progress thread is needed to drain the transport.
    let progress = (config.ranks > 1).then(|| dispatcher.spawn_progress_thread(config.backoff_max));

    let locality = Locality {
        config,
        gas,
        scheduler,
        dispatcher,
        registry,
        run_complete: builder.run_complete,
        progress,
    };
    LOCALITY
        .set(locality)
        .unwrap_or_else(|_| panic!("gasrt::init called more than once"));
    Ok(())
}

/// Dispatches `action` against this locality's root address with `payload`,
/// blocks until it (and everything it transitively fires as a
/// continuation, via the reserved run-complete action) has produced a
/// result, and returns that result's first four bytes decoded as a
/// little-endian `i32` status (0 if the reply was empty). Spec §6's
/// `run(action, args…) → status`.
///
/// # Errors
///
/// Returns [`Error::NotInitialized`] if [`init`] has not run, or
/// [`Error::UnknownAction`] if `action` was never registered.
pub fn run(action: &str, payload: &[u8]) -> Result<i32> {
    let locality = locality()?;
    let action_id = locality
        .registry
        .lookup_by_name(action)
        .ok_or_else(|| Error::UnknownAction(action.to_string()))?;

    let slot = run_slot();
    *slot.result.lock().unwrap() = None;

    let mut parcel = Parcel::acquire(payload.len()).with_data(payload);
    parcel.set_target(locality.gas.here());
    parcel.set_action(action_id);
    parcel.set_continuation(locality.gas.here(), locality.run_complete);
    locality.scheduler.deliver(parcel);

    let mut guard = slot.result.lock().unwrap();
    while guard.is_none() {
        guard = slot.cv.wait(guard).unwrap();
    }
    let bytes = guard.take().unwrap();
    Ok(decode_status(&bytes))
}

fn decode_status(bytes: &[u8]) -> i32 {
    bytes
        .get(0..4)
        .and_then(|b| b.try_into().ok())
        .map(i32::from_le_bytes)
        .unwrap_or(0)
}

/// Drains the transport, joins the worker pool and progress thread, and
/// drops the locality's resources. Spec §6's `finalize()`.
///
/// # Errors
///
/// Returns [`Error::NotInitialized`] if [`init`] has not run.
pub fn finalize() -> Result<()> {
    let locality = locality()?;
    locality.dispatcher.flush_on_shutdown();
    locality.scheduler.shutdown();
    Ok(())
}

/// Finalizes the locality and terminates this process with `code`. Spec
/// §6's `exit(code)`: the ordinary, successful end of a locality's run.
pub fn exit(code: i32) -> ! {
    let _ = finalize();
    std::process::exit(code);
}

/// Logs `reason` and terminates this process immediately, without
/// attempting to drain in-flight parcels. Spec §7's `Fatal` path
/// ("the runtime logs and aborts"); broadcasting the abort to peer
/// localities is the bootstrap layer's job (spec §1 excludes it from this
/// workspace — a real deployment's launcher is expected to notice this
/// process exiting and tear down its siblings).
pub fn abort(reason: &str) -> ! {
    tracing::error!(reason, "locality aborting");
    std::process::abort();
}

/// This locality's rank.
///
/// # Errors
///
/// Returns [`Error::NotInitialized`] if [`init`] has not run.
pub fn my_rank() -> Result<u32> {
    Ok(locality()?.gas.rank())
}

/// The total number of ranks in this run.
///
/// # Errors
///
/// Returns [`Error::NotInitialized`] if [`init`] has not run.
pub fn num_ranks() -> Result<u32> {
    Ok(locality()?.gas.ranks())
}

/// The number of worker threads this locality's scheduler runs.
///
/// # Errors
///
/// Returns [`Error::NotInitialized`] if [`init`] has not run.
pub fn num_threads() -> Result<usize> {
    Ok(locality()?.scheduler.num_workers())
}

/// This locality's own well-known address.
///
/// # Errors
///
/// Returns [`Error::NotInitialized`] if [`init`] has not run.
pub fn here() -> Result<GlobalAddr> {
    Ok(locality()?.gas.here())
}

/// The well-known root address of `rank`, reachable without a prior
/// allocation — the original's `hpx_addr_from_rank`.
#[must_use]
pub fn there(rank: u32) -> GlobalAddr {
    GlobalAddr::of_locality_root(rank)
}

/// Hands `parcel` to this locality's dispatcher: delivered to the local
/// scheduler if `parcel.target` is local, or forwarded over the network
/// transport otherwise. Spec §6's `send`.
///
/// # Errors
///
/// Returns [`Error::NotInitialized`] if [`init`] has not run.
pub fn send(parcel: Box<Parcel>) -> Result<()> {
    locality()?.dispatcher.submit(parcel);
    Ok(())
}

/// Spec §6's `send-sync`: like [`send`], but for this in-process dispatcher
/// the hand-off to the network layer already happens synchronously, so
/// there is nothing further to block on.
///
/// # Errors
///
/// Returns [`Error::NotInitialized`] if [`init`] has not run.
pub fn send_sync(parcel: Box<Parcel>) -> Result<()> {
    send(parcel)
}
