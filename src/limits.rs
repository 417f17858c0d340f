use crate::model::Ms;

pub const MS_PER_HOUR: Ms = 3_600_000;

pub const MAX_PLACES: usize = 10_000;
pub const MAX_STUDIOS: usize = 100_000;
pub const MAX_RESERVATIONS_PER_STUDIO: usize = 1_000_000;

pub const MAX_PLACE_NAME_LEN: usize = 200;
pub const MAX_STUDIO_NAME_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 4000;
pub const MAX_CITY_LEN: usize = 200;
pub const MAX_ADDRESS_LEN: usize = 500;
