//! Stateless numeric helpers shared by summary derivation, analytics and the
//! HTTP responses.
//!
//! Every aggregation here treats a missing sample as "not recorded": an input
//! made only of absent values yields `None`, never `0.0` or `NaN`.

mod distance;
mod duration;
mod number;
mod pace;
mod regression;

pub use distance::distance_to_human;
pub use duration::{
    millis_to_clock, millis_to_human, millis_to_short_clock, seconds_to_clock, seconds_to_human,
};
pub use number::{Accumulator, avg, max, min, sum};
pub use pace::{format_pace, session_has_pace, sport_has_pace};
pub use regression::{LinearRegression, Point, RegressionError};
