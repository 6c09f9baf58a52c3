//! Execution tracer.

use crate::opcodes::Opcode;

/// A single trace entry, captured before the instruction executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceStep {
    pub cycle: u64,
    pub pc: usize,
    pub opcode: Opcode,
    pub ax: i64,
    pub sp: usize,
    pub bp: usize,
}

/// Records execution for debugging and replay comparison.
pub struct Tracer {
    steps: Vec<TraceStep>,
    enabled: bool,
}

impl Tracer {
    pub fn new(enabled: bool) -> Self {
        Self {
            steps: Vec::new(),
            enabled,
        }
    }

    pub fn record(&mut self, step: TraceStep) {
        if self.enabled {
            self.steps.push(step);
        }
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    /// The accumulator value at every executed instruction.
    pub fn ax_trajectory(&self) -> Vec<i64> {
        self.steps.iter().map(|s| s.ax).collect()
    }

    /// Print a human-readable trace.
    pub fn print_trace(&self) {
        for step in &self.steps {
            println!(
                "{:6}: pc={:05} {:?} ax={} sp={:#x} bp={:#x}",
                step.cycle, step.pc, step.opcode, step.ax, step.sp, step.bp,
            );
        }
    }
}
