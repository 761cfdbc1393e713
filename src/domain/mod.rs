mod ledger;
mod luhn;
mod operation;
mod points;

pub use ledger::*;
pub use luhn::*;
pub use operation::*;
pub use points::*;
