mod firmware;

pub use firmware::FirmwareUsecases;
