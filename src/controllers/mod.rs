pub mod alerts_controller;
pub mod home_controller;
pub mod notifications_controller;
