mod nor_flash;
mod ram_flash;

pub use nor_flash::NorFlashDriver;
pub use ram_flash::{OpLog, RamFlash};
