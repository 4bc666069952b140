pub mod convergence;
pub mod film_coefficients;
pub mod furniture;
pub mod multilayer_wall;
pub mod network;
pub mod pcm;
pub mod radiative_exchange;
pub mod room;
pub mod surface;
pub mod surface_system;
