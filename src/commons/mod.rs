//! Common types used by the various tally components.
pub mod error;

//------------ Response Aliases ----------------------------------------------

pub type TallyEmptyResult = std::result::Result<(), self::error::Error>;
pub type TallyResult<T> = std::result::Result<T, self::error::Error>;
