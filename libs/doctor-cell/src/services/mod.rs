pub mod availability;
pub mod doctor;
pub mod license;
pub mod review;
pub mod slots;

pub use availability::AvailabilityService;
pub use doctor::DoctorService;
pub use license::LicenseService;
pub use review::ReviewService;
pub use slots::SlotService;
