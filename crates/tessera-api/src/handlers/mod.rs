pub mod health;
pub mod imports;
pub mod media;
pub mod uploads;
