// Stagetrain - staged training launcher
// Library exports

pub mod config; // Runner settings (file + environment)
pub mod errors;
pub mod training; // Stages, launcher and runner
