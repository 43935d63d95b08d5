//! Device session layer: the raw byte channel over SSH or Telnet, the
//! login/prompt state machine, the vendor profile table, and the output
//! normalizer that drains unframed command responses.

pub mod channel;
pub mod driver;
pub mod normalize;
pub mod ssh;
pub mod telnet;
pub mod vendor;

pub use channel::RawChannel;
pub use driver::SessionDriver;
pub use vendor::{VendorProfile, resolve};
