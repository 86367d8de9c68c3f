pub mod health;
pub mod params;
pub mod playlist;
pub mod proxy;
pub mod xtream;
