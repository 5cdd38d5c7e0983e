use crate::{interpreter::Frame, opcodes::Opcode};

/// Instrumentation hooks. Observers are registered at interpreter
/// construction and called at fixed points; they see the frame, they
/// never mutate it.
#[allow(unused_variables)] // default impl ignores all arguments
pub trait VmObserver {
    fn frame_start(&mut self, frame: &Frame) {}
    fn before_step(&mut self, frame: &Frame, op: &Opcode) {}
    fn frame_end(&mut self, frame: &Frame) {}
}

#[derive(Default)]
pub struct NoopObserver;

impl VmObserver for NoopObserver {}

/// Emits one tracing line per step and per frame boundary, mirroring what
/// the engine logs in verbose runs: pc, mnemonic, gas left, depth.
#[derive(Default)]
pub struct LoggingObserver;

impl VmObserver for LoggingObserver {
    fn frame_start(&mut self, frame: &Frame) {
        tracing::debug!(
            owner = %frame.owner,
            depth = frame.depth,
            gas = frame.gas.remaining(),
            "frame start",
        );
    }

    fn before_step(&mut self, frame: &Frame, op: &Opcode) {
        tracing::debug!(
            pc = frame.pc,
            op = %op.name(),
            gas = frame.gas.remaining(),
            depth = frame.depth,
            "step",
        );
    }

    fn frame_end(&mut self, frame: &Frame) {
        tracing::debug!(
            owner = %frame.owner,
            depth = frame.depth,
            gas_used = frame.gas.used(),
            reverted = frame.reverted,
            "frame end",
        );
    }
}

/// Shared-handle adapter so a caller can keep inspecting an observer it
/// has handed to the interpreter.
impl<T: VmObserver> VmObserver for std::rc::Rc<std::cell::RefCell<T>> {
    fn frame_start(&mut self, frame: &Frame) {
        self.borrow_mut().frame_start(frame);
    }

    fn before_step(&mut self, frame: &Frame, op: &Opcode) {
        self.borrow_mut().before_step(frame, op);
    }

    fn frame_end(&mut self, frame: &Frame) {
        self.borrow_mut().frame_end(frame);
    }
}

/// Counts steps and frames; handy in tests asserting the hook points fire.
#[derive(Default)]
pub struct CountingObserver {
    pub steps: usize,
    pub frames_started: usize,
    pub frames_ended: usize,
}

impl VmObserver for CountingObserver {
    fn frame_start(&mut self, _frame: &Frame) {
        self.frames_started += 1;
    }

    fn before_step(&mut self, _frame: &Frame, _op: &Opcode) {
        self.steps += 1;
    }

    fn frame_end(&mut self, _frame: &Frame) {
        self.frames_ended += 1;
    }
}
