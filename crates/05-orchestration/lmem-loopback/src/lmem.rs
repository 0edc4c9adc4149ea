//! `LMemLoopback` configuration: LMem layout, typed actions and the device
//! half of a run.

use std::fmt;

use device_abi::{BufferHandle, DeviceService};
use tracing::debug;

use crate::action::Action;
use crate::config::LoopbackConfig;
use crate::reference::ensure_len;
use crate::session::DeviceSession;
use crate::timing::StepTimings;
use crate::{LoopbackError, LoopbackResult};

pub const WRITE_LMEM: &str = "writeLMem";
pub const READ_LMEM: &str = "readLMem";
pub const COMPUTE: &str = "default";
pub const CPU_TO_LMEM: &str = "cpu_to_lmem";
pub const LMEM_TO_CPU: &str = "lmem_to_cpu";

const WORD_BYTES: u64 = 4;

/// Byte range of LMem.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LMemRegion {
    pub address: u64,
    pub bytes: u64,
}

impl LMemRegion {
    pub const fn new(address: u64, bytes: u64) -> Self {
        Self { address, bytes }
    }

    /// One past the last byte, or `None` on overflow.
    pub fn end(&self) -> Option<u64> {
        self.address.checked_add(self.bytes)
    }

    fn overlaps(&self, other: &LMemRegion) -> bool {
        self.address < other.address + other.bytes && other.address < self.address + self.bytes
    }
}

impl fmt::Display for LMemRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.address, self.address + self.bytes)
    }
}

/// Placement of the two input blocks and the result block in LMem.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LMemLayout {
    pub input_a: LMemRegion,
    pub input_b: LMemRegion,
    pub output: LMemRegion,
}

impl LMemLayout {
    /// Validates an explicit layout.
    pub fn new(input_a: LMemRegion, input_b: LMemRegion, output: LMemRegion) -> LoopbackResult<Self> {
        let layout = Self {
            input_a,
            input_b,
            output,
        };
        layout.validate()?;
        Ok(layout)
    }

    /// Blocks of `elements` words placed back to back: A, then B, then the
    /// result. This is where the `LMemLoopback` kernel reads and writes.
    pub fn contiguous(elements: usize) -> LoopbackResult<Self> {
        let bytes = (elements as u64)
            .checked_mul(WORD_BYTES)
            .ok_or_else(|| LoopbackError::InvalidLayout(format!("{elements} elements overflow")))?;
        let output = bytes
            .checked_mul(2)
            .ok_or_else(|| LoopbackError::InvalidLayout(format!("{elements} elements overflow")))?;
        Self::new(
            LMemRegion::new(0, bytes),
            LMemRegion::new(bytes, bytes),
            LMemRegion::new(output, bytes),
        )
    }

    pub fn validate(&self) -> LoopbackResult<()> {
        let regions = [
            ("input A", self.input_a),
            ("input B", self.input_b),
            ("output", self.output),
        ];
        for (name, region) in regions {
            if region.end().is_none() {
                return Err(LoopbackError::InvalidLayout(format!(
                    "{name} region at {} overflows the address space",
                    region.address
                )));
            }
            if region.bytes % WORD_BYTES != 0 {
                return Err(LoopbackError::InvalidLayout(format!(
                    "{name} region of {} bytes is not word aligned",
                    region.bytes
                )));
            }
        }
        for (i, (name, region)) in regions.iter().enumerate() {
            for (other_name, other) in &regions[i + 1..] {
                if region.overlaps(other) {
                    return Err(LoopbackError::InvalidLayout(format!(
                        "{name} {region} overlaps {other_name} {other}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Streams `source` into LMem at `region`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteLMem {
    pub region: LMemRegion,
    pub source: BufferHandle,
}

impl From<WriteLMem> for Action {
    fn from(write: WriteLMem) -> Self {
        Action::builder(WRITE_LMEM)
            .param("address", write.region.address)
            .param("nbytes", write.region.bytes)
            .input(CPU_TO_LMEM, write.source, write.region.bytes)
            .build()
    }
}

/// Streams LMem at `region` into `target`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadLMem {
    pub region: LMemRegion,
    pub target: BufferHandle,
}

impl From<ReadLMem> for Action {
    fn from(read: ReadLMem) -> Self {
        Action::builder(READ_LMEM)
            .param("address", read.region.address)
            .param("nbytes", read.region.bytes)
            .output(LMEM_TO_CPU, read.target, read.region.bytes)
            .build()
    }
}

/// Sums the two input blocks into the result block, `elements` words each.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopbackCompute {
    pub elements: u64,
}

impl From<LoopbackCompute> for Action {
    fn from(compute: LoopbackCompute) -> Self {
        Action::builder(COMPUTE)
            .param("N", compute.elements)
            .build()
    }
}

/// Runs the device half of a loopback test and returns the device output.
///
/// `connect` opens the session; each subsequent step is timed under its own
/// label. Any failure aborts immediately without releasing what was already
/// allocated.
pub fn run_device<S, F>(
    connect: F,
    config: &LoopbackConfig,
    input_a: &[i32],
    input_b: &[i32],
    timings: &mut StepTimings,
) -> LoopbackResult<Vec<i32>>
where
    S: DeviceService,
    F: FnOnce(&LoopbackConfig) -> LoopbackResult<DeviceSession<S>>,
{
    let n = config.size;
    ensure_len("input A", input_a, n)?;
    ensure_len("input B", input_b, n)?;
    let layout = LMemLayout::contiguous(n)?;
    let elements = n as u64;

    let mut session = timings.step("Opening connection", || connect(config))?;
    let config_handle = timings.step("Initializing maxfile", || {
        session.load_configuration(&config.configuration)
    })?;
    let engine = timings.step("Loading DFE", || {
        session.load_engine(config_handle, &config.engine)
    })?;

    let (buffer_a, buffer_b) = timings.step("Sending input data", || {
        let buffer_a = session.allocate(elements)?;
        session.send(buffer_a, &input_a[..n])?;
        let buffer_b = session.allocate(elements)?;
        session.send(buffer_b, &input_b[..n])?;
        Ok::<_, LoopbackError>((buffer_a, buffer_b))
    })?;
    let buffer_out = timings.step("Allocating memory for output stream on server", || {
        session.allocate(elements)
    })?;

    timings.step("Writing to LMem", || {
        session.run(
            engine,
            WriteLMem {
                region: layout.input_a,
                source: buffer_a,
            }
            .into(),
        )?;
        session.run(
            engine,
            WriteLMem {
                region: layout.input_b,
                source: buffer_b,
            }
            .into(),
        )
    })?;
    timings.step("LMemLoopback time", || {
        session.run(engine, LoopbackCompute { elements }.into())
    })?;
    timings.step("Reading from LMem", || {
        session.run(
            engine,
            ReadLMem {
                region: layout.output,
                target: buffer_out,
            }
            .into(),
        )
    })?;
    timings.step("Unloading DFE", || session.unload_engine(engine))?;

    let output = timings.step("Getting output stream", || {
        session.receive(buffer_out, elements)
    })?;
    timings.step("Freeing allocated memory for streams on server", || {
        session.release(buffer_a)?;
        session.release(buffer_b)?;
        session.release(buffer_out)
    })?;
    timings.step("Freeing allocated maxfile data", || {
        session.free_configuration(config_handle)
    })?;

    timings.step("Closing connection", || session.close())?;
    debug!(elements = output.len(), "device output received");

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmem_sim::SimDevice;
    use pretty_assertions::assert_eq;

    #[test]
    fn contiguous_layout_matches_kernel_addressing() {
        let layout = LMemLayout::contiguous(384).expect("layout");
        assert_eq!(layout.input_a, LMemRegion::new(0, 1536));
        assert_eq!(layout.input_b, LMemRegion::new(1536, 1536));
        assert_eq!(layout.output, LMemRegion::new(3072, 1536));
    }

    #[test]
    fn overlapping_regions_are_rejected() {
        let err = LMemLayout::new(
            LMemRegion::new(0, 16),
            LMemRegion::new(8, 16),
            LMemRegion::new(64, 16),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid LMem layout: input A [0, 16) overlaps input B [8, 24)"
        );
    }

    #[test]
    fn unaligned_regions_are_rejected() {
        let err = LMemLayout::new(
            LMemRegion::new(0, 6),
            LMemRegion::new(8, 8),
            LMemRegion::new(16, 8),
        )
        .unwrap_err();
        assert!(matches!(err, LoopbackError::InvalidLayout(_)));
    }

    #[test]
    fn presets_lower_to_named_params_and_streams() {
        let buffer = BufferHandle::from_raw(0x20);
        let action: Action = WriteLMem {
            region: LMemRegion::new(1536, 1536),
            source: buffer,
        }
        .into();
        assert_eq!(action.operation(), WRITE_LMEM);
        assert_eq!(
            action.params(),
            &[("address".to_string(), 1536), ("nbytes".to_string(), 1536)]
        );
        assert_eq!(action.streams()[0].stream, CPU_TO_LMEM);
        assert_eq!(action.streams()[0].bytes, 1536);

        let compute: Action = LoopbackCompute { elements: 384 }.into();
        assert_eq!(compute.params(), &[("N".to_string(), 384)]);
        assert!(compute.streams().is_empty());
    }

    #[test]
    fn device_run_returns_sums_and_times_every_step() {
        let config = LoopbackConfig {
            size: 16,
            ..LoopbackConfig::default()
        };
        let (a, b) = crate::generate_inputs(16).expect("inputs");
        let mut timings = StepTimings::new();
        let output = run_device(
            |_| Ok(DeviceSession::new(SimDevice::default())),
            &config,
            &a,
            &b,
            &mut timings,
        )
        .expect("device run");
        assert_eq!(output, vec![16; 16]);

        let labels: Vec<_> = timings.steps().iter().map(|s| s.label).collect();
        assert_eq!(
            labels,
            vec![
                "Opening connection",
                "Initializing maxfile",
                "Loading DFE",
                "Sending input data",
                "Allocating memory for output stream on server",
                "Writing to LMem",
                "LMemLoopback time",
                "Reading from LMem",
                "Unloading DFE",
                "Getting output stream",
                "Freeing allocated memory for streams on server",
                "Freeing allocated maxfile data",
                "Closing connection",
            ]
        );
    }

    #[test]
    fn short_inputs_fail_before_connecting() {
        let config = LoopbackConfig {
            size: 8,
            ..LoopbackConfig::default()
        };
        let mut connected = false;
        let err = run_device(
            |_| {
                connected = true;
                Ok(DeviceSession::new(SimDevice::default()))
            },
            &config,
            &[0; 4],
            &[0; 8],
            &mut StepTimings::new(),
        )
        .unwrap_err();
        assert!(matches!(err, LoopbackError::OutOfRange { len: 4, .. }));
        assert!(!connected);
    }

    #[test]
    fn unknown_configuration_aborts_the_run() {
        let config = LoopbackConfig {
            size: 4,
            configuration: "MovingAverage".into(),
            ..LoopbackConfig::default()
        };
        let (a, b) = crate::generate_inputs(4).expect("inputs");
        let mut timings = StepTimings::new();
        let err = run_device(
            |_| Ok(DeviceSession::new(SimDevice::default())),
            &config,
            &a,
            &b,
            &mut timings,
        )
        .unwrap_err();
        assert!(matches!(err, LoopbackError::RemoteOperation(_)), "{err:?}");
        assert_eq!(timings.steps().len(), 1);
    }
}
