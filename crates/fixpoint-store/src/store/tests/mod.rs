pub(crate) mod common;

mod cycles;
mod lazy_and_triggered;
mod monotonicity;
