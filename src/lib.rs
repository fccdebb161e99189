pub mod config;
pub mod control;
pub mod detector;
pub mod display;
pub mod feature;
pub mod frame;
pub mod image;
pub mod my_types;
pub mod optical_flow;
pub mod pyramid;
pub mod session;
pub mod stationary;
pub mod tracker;
pub mod video;
pub mod visualization;
