#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

mod clock;
pub use clock::*;

mod stage;
pub use stage::Stage;

mod rate_compliance_gate;
pub use rate_compliance_gate::*;

mod keyed_rate_compliance_gate;
pub use keyed_rate_compliance_gate::*;

mod error;
pub use error::*;

mod common;
pub use common::{Compliance, CooldownMs};
