// Module audio - Boundary to the host audio subsystem and asset loading

pub mod assets;
pub mod backend;
pub mod parameters;
