use std::panic;
use std::thread;
use std::time::Instant;

use device_abi::DeviceService;
use tracing::{error, info, info_span};

use crate::config::LoopbackConfig;
use crate::lmem::run_device;
use crate::reference::{generate_inputs, reference_sum};
use crate::session::DeviceSession;
use crate::timing::StepTimings;
use crate::verify::{verify, Verification};
use crate::LoopbackResult;

/// Everything a completed run produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunReport {
    pub size: usize,
    pub output: Vec<i32>,
    pub expected: Vec<i32>,
    pub verification: Verification,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.verification.passed()
    }
}

/// Runs one loopback test end to end.
///
/// The reference sum is computed on a scoped worker thread while the device
/// half runs on the calling thread. A device failure aborts the run before any
/// comparison, so a run that could not reach the device never passes.
pub fn run_loopback<S, F>(
    config: &LoopbackConfig,
    connect: F,
    timings: &mut StepTimings,
) -> LoopbackResult<RunReport>
where
    S: DeviceService,
    F: FnOnce(&LoopbackConfig) -> LoopbackResult<DeviceSession<S>>,
{
    config.validate()?;
    let n = config.size;
    let (input_a, input_b) = timings.step("Generating input data", || generate_inputs(n))?;

    let (device, (expected, cpu_elapsed)) = thread::scope(|scope| {
        let worker = scope.spawn(|| {
            let start = Instant::now();
            let expected = reference_sum(&input_a, &input_b, n);
            (expected, start.elapsed())
        });

        let span = info_span!("step", label = "LMemLoopback DFE total time");
        let device = {
            let _guard = span.enter();
            let start = Instant::now();
            let output = run_device(connect, config, &input_a, &input_b, timings);
            output.map(|output| (output, start.elapsed()))
        };
        let reference = worker
            .join()
            .unwrap_or_else(|payload| panic::resume_unwind(payload));
        (device, reference)
    });

    let (output, dfe_elapsed) = device.inspect_err(|err| error!(error = %err, "device run failed"))?;
    timings.record("LMemLoopback DFE total time", dfe_elapsed);
    timings.record("LMemLoopback CPU total time", cpu_elapsed);
    let expected = expected?;

    let verification = timings.measure("Checking results", || verify(&output, &expected, n));
    info!(
        checked = verification.checked,
        failures = verification.failures(),
        "verification complete"
    );

    Ok(RunReport {
        size: n,
        output,
        expected,
        verification,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LoopbackError;
    use lmem_sim::SimDevice;

    fn config(size: usize) -> LoopbackConfig {
        LoopbackConfig {
            size,
            ..LoopbackConfig::default()
        }
    }

    #[test]
    fn passes_against_simulator() {
        let mut timings = StepTimings::new();
        let report = run_loopback(
            &config(384),
            |_| Ok(DeviceSession::new(SimDevice::default())),
            &mut timings,
        )
        .expect("run");
        assert!(report.passed());
        assert_eq!(report.output, vec![384; 384]);
        for label in [
            "Generating input data",
            "LMemLoopback DFE total time",
            "LMemLoopback CPU total time",
            "Checking results",
        ] {
            assert!(timings.get(label).is_some(), "missing step {label}");
        }
    }

    #[test]
    fn corrupted_lanes_fail_verification() {
        let report = run_loopback(
            &config(384),
            |_| Ok(DeviceSession::new(SimDevice::default().with_bit_flips([5, 200]))),
            &mut StepTimings::new(),
        )
        .expect("run");
        assert!(!report.passed());
        assert_eq!(report.verification.summary(), "Test failed 2 times!");
    }

    #[test]
    fn invalid_config_is_rejected_before_connecting() {
        let err = run_loopback(
            &config(0),
            |_| -> LoopbackResult<DeviceSession<SimDevice>> {
                panic!("connect must not be called")
            },
            &mut StepTimings::new(),
        )
        .unwrap_err();
        assert!(matches!(err, LoopbackError::Config(_)));
    }
}
