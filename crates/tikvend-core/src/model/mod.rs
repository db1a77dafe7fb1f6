// ── Domain model ──

mod device;
mod session;
mod voucher;

pub use device::{DeviceId, DeviceRecord};
pub use session::Session;
pub use voucher::{Plan, TimePolicy, Voucher, VoucherStatus};
