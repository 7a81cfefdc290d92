pub const PI: f64 = 3.141592653589793238462643;

pub const TWOPI: f64 = 6.283185307179586476925287;

pub const DEG_TO_RAD: f64 = PI / 180.0;

pub const RAD_TO_DEG: f64 = 180.0 / PI;

pub const SECONDS_PER_DAY_F64: f64 = 86_400.0;

/// Offset between Julian Date and Modified Julian Date.
pub const MJD_ZERO_POINT: f64 = 2_400_000.5;

/// MJD of the Unix epoch, 1970-01-01T00:00:00 UTC.
pub const UNIX_EPOCH_MJD: f64 = 40_587.0;

/// Full sphere solid angle in steradians.
pub const FOUR_PI_SR: f64 = 12.566370614359172953850574;
