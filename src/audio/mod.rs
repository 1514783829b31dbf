//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod ingest;
pub mod source;
pub mod tone;

pub use buffer::{create_shared_buffer, RingBuffer, SharedRingBuffer};
pub use capture::AudioCapture;
pub use device::{get_input_device, list_input_devices, AudioDevice, AudioDeviceInfo};
pub use ingest::CaptureIngest;
pub use source::PcmSource;
pub use tone::{ToneCursor, ToneWaveform};
