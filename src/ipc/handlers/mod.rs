pub mod activities;
pub mod backup;
pub mod bonus;
pub mod calc;
pub mod core;
pub mod directory;
pub mod grades;
pub mod locks;
pub mod reports;
pub mod setup;
