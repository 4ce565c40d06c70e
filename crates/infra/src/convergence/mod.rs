//! Read-model convergence: "submit, then wait for catch-up, else degrade".
//!
//! A caller that just dispatched a command knows the version it last observed for
//! the target entity. The poller samples the read model until a strictly newer
//! version shows up (optionally one in a terminal state), or the budget runs out.
//!
//! ```text
//! caller ── submit ──▶ CommandGateway ──▶ channel ──▶ processor ──▶ read store
//!   │                                                                  ▲
//!   └──────────── ConvergencePoller::wait_for_version ── samples ──────┘
//! ```
//!
//! Running out of budget is a normal outcome (`Convergence::TimedOut`), not an
//! error: the write may still land later, so the caller should present an
//! "unknown, try later" answer.

pub mod budget;
pub mod poller;
pub mod request;

pub use budget::{BudgetError, ConvergenceBudget};
pub use poller::ConvergencePoller;
pub use request::{Convergence, ConvergenceRequest, ExitPredicate};
