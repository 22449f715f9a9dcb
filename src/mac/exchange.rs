//! Frame exchange step engine
//!
//! A frame exchange is a resumable run over a numbered list of steps. Each
//! step issues exactly one operation (transmit, wait for a reply, jump to
//! another step, or finish) and the run then suspends until the outcome of
//! that operation is signalled by the owner.
//!
//! The engine does not perform any IO itself, operations are returned to
//! the owner as [`Request`]s to be carried out on the transmit coordinator
//! and timer table.
//
// wlan-mac, IEEE 802.11 DCF / EDCA MAC
// SPDX-License-Identifier: MPL-2.0

use log::{error, trace};

use crate::Ts;
use crate::error::ProtocolError;
use crate::frame::Frame;
use super::contention::ContentionParams;
use super::tx::TxIndex;

/// Maximum number of consecutive goto operations before a run is aborted
pub const MAX_GOTO: usize = 64;

/// Frame exchange status
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    InProgress,
    Succeeded,
    Failed,
}

/// Request issued by a frame exchange for the owner to execute
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    /// Transmit a frame on the exchange's contention channel
    TransmitContention(Frame, ContentionParams),
    /// Transmit a frame on the immediate channel after the provided IFS
    TransmitImmediate(Frame, Ts),
    /// Wait for a reply, timing out after the provided duration
    ExpectReply(Ts),
    /// The exchange has finished with the provided success flag
    Finished(bool),
}

#[derive(Clone, Debug, PartialEq)]
enum Operation {
    Request(Request),
    Goto(usize),
}

/// Operation slot handed to each step, exactly one operation may be issued
#[derive(Debug, PartialEq)]
pub struct Operations {
    step: usize,
    issued: Option<Operation>,
}

impl Operations {
    fn new(step: usize) -> Self {
        Self{ step, issued: None }
    }

    /// Current step index
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn transmit_contention(&mut self, frame: Frame, params: ContentionParams) -> Result<(), ProtocolError> {
        self.issue(Operation::Request(Request::TransmitContention(frame, params)))
    }

    pub fn transmit_immediate(&mut self, frame: Frame, ifs: Ts) -> Result<(), ProtocolError> {
        self.issue(Operation::Request(Request::TransmitImmediate(frame, ifs)))
    }

    pub fn expect_reply(&mut self, timeout: Ts) -> Result<(), ProtocolError> {
        self.issue(Operation::Request(Request::ExpectReply(timeout)))
    }

    /// Continue at the provided step without suspending
    pub fn goto_step(&mut self, step: usize) -> Result<(), ProtocolError> {
        self.issue(Operation::Goto(step))
    }

    pub fn fail(&mut self) -> Result<(), ProtocolError> {
        self.issue(Operation::Request(Request::Finished(false)))
    }

    pub fn succeed(&mut self) -> Result<(), ProtocolError> {
        self.issue(Operation::Request(Request::Finished(true)))
    }

    fn issue(&mut self, op: Operation) -> Result<(), ProtocolError> {
        if self.issued.is_some() {
            return Err(ProtocolError::OperationAlreadyIssued{ step: self.step });
        }

        self.issued = Some(op);
        Ok(())
    }
}

/// Step hooks implemented by each frame exchange protocol
pub trait Steps {
    /// Execute a step, issuing exactly one operation
    fn do_step(&mut self, step: usize, ops: &mut Operations) -> Result<(), ProtocolError>;

    /// Offer a received frame while waiting for a reply, returns whether
    /// the frame was accepted
    fn process_reply(&mut self, step: usize, frame: &Frame) -> bool;

    /// Handle a reply timeout, may issue a goto or terminal operation
    fn process_timeout(&mut self, step: usize, ops: &mut Operations) -> Result<(), ProtocolError>;

    /// Handle an internal collision, may issue a goto or terminal operation
    fn process_internal_collision(&mut self, step: usize, ops: &mut Operations) -> Result<(), ProtocolError>;
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Awaiting {
    Nothing,
    Transmission{ contention: bool },
    Reply,
}

/// Frame exchange run
#[derive(Clone, Debug, PartialEq)]
pub struct FrameExchange<S> {
    steps: S,
    step: Option<usize>,
    awaiting: Awaiting,
    status: Status,
}

impl <S: Steps> FrameExchange<S> {
    pub fn new(steps: S) -> Self {
        Self {
            steps,
            step: None,
            awaiting: Awaiting::Nothing,
            status: Status::InProgress,
        }
    }

    pub fn steps(&self) -> &S {
        &self.steps
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Current step, `None` before the run is started
    pub fn step(&self) -> Option<usize> {
        self.step
    }

    /// Whether the exchange is waiting for a reply
    pub fn awaiting_reply(&self) -> bool {
        self.awaiting == Awaiting::Reply
    }

    /// Start the run, returning the first request
    pub fn start(&mut self) -> Result<Request, ProtocolError> {
        self.step = None;
        self.status = Status::InProgress;
        self.awaiting = Awaiting::Nothing;

        self.proceed(None)
    }

    /// Signal that the outstanding transmission has completed
    pub fn transmission_complete(&mut self, index: TxIndex) -> Result<Request, ProtocolError> {
        let step = self.check_running()?;

        match (self.awaiting, index) {
            (Awaiting::Transmission{ contention: true }, TxIndex::Contention(_)) |
            (Awaiting::Transmission{ contention: false }, TxIndex::Immediate) => (),
            _ => return Err(self.abort(ProtocolError::UnexpectedEvent{ step, event: "transmission complete" })),
        }

        trace!("Exchange step {} transmission complete", step);

        self.awaiting = Awaiting::Nothing;
        self.proceed(None)
    }

    /// Signal that the outstanding contention transmission collided internally
    pub fn internal_collision(&mut self) -> Result<Request, ProtocolError> {
        let step = self.check_running()?;

        if self.awaiting != (Awaiting::Transmission{ contention: true }) {
            return Err(self.abort(ProtocolError::UnexpectedEvent{ step, event: "internal collision" }));
        }

        self.awaiting = Awaiting::Nothing;

        let mut ops = Operations::new(step);
        if let Err(e) = self.steps.process_internal_collision(step, &mut ops) {
            return Err(self.abort(e));
        }

        self.resume(ops)
    }

    /// Signal that the reply timeout has expired
    pub fn reply_timeout(&mut self) -> Result<Request, ProtocolError> {
        let step = self.check_running()?;

        if self.awaiting != Awaiting::Reply {
            return Err(self.abort(ProtocolError::UnexpectedEvent{ step, event: "reply timeout" }));
        }

        trace!("Exchange step {} reply timeout", step);

        self.awaiting = Awaiting::Nothing;

        let mut ops = Operations::new(step);
        if let Err(e) = self.steps.process_timeout(step, &mut ops) {
            return Err(self.abort(e));
        }

        self.resume(ops)
    }

    /// Offer a received frame to the exchange.
    ///
    /// Returns `None` if the frame is not for this exchange (the exchange is
    /// not waiting for a reply or the reply was rejected), otherwise the
    /// next request of the run.
    pub fn lower_frame_received(&mut self, frame: &Frame) -> Result<Option<Request>, ProtocolError> {
        let step = match (self.status, self.step) {
            (Status::InProgress, Some(step)) if self.awaiting == Awaiting::Reply => step,
            _ => return Ok(None),
        };

        if !self.steps.process_reply(step, frame) {
            return Ok(None);
        }

        trace!("Exchange step {} accepted {}", step, frame.kind);

        self.awaiting = Awaiting::Nothing;
        self.proceed(None).map(Some)
    }

    fn check_running(&self) -> Result<usize, ProtocolError> {
        match (self.status, self.step) {
            (Status::InProgress, Some(step)) => Ok(step),
            _ => Err(ProtocolError::ExchangeFinished),
        }
    }

    /// Continue after an event hook, honouring any operation it issued
    fn resume(&mut self, ops: Operations) -> Result<Request, ProtocolError> {
        match ops.issued {
            None => self.proceed(None),
            Some(Operation::Goto(step)) => self.proceed(Some(step)),
            Some(Operation::Request(r)) => Ok(self.suspend(r)),
        }
    }

    /// Run steps until one suspends or terminates the exchange
    fn proceed(&mut self, mut goto: Option<usize>) -> Result<Request, ProtocolError> {
        let mut jumps = 0;

        loop {
            let step = match goto.take() {
                Some(s) => s,
                None => self.step.map(|s| s + 1).unwrap_or(0),
            };
            self.step = Some(step);

            let mut ops = Operations::new(step);
            if let Err(e) = self.steps.do_step(step, &mut ops) {
                return Err(self.abort(e));
            }

            match ops.issued {
                Some(Operation::Goto(s)) => {
                    jumps += 1;
                    if jumps > MAX_GOTO {
                        return Err(self.abort(ProtocolError::GotoLoop{ step }));
                    }

                    trace!("Exchange goto {} from step {}", s, step);
                    goto = Some(s);
                },
                Some(Operation::Request(r)) => return Ok(self.suspend(r)),
                None => return Err(self.abort(ProtocolError::NoOperation{ step })),
            }
        }
    }

    fn suspend(&mut self, r: Request) -> Request {
        match &r {
            Request::TransmitContention(..) => self.awaiting = Awaiting::Transmission{ contention: true },
            Request::TransmitImmediate(..) => self.awaiting = Awaiting::Transmission{ contention: false },
            Request::ExpectReply(..) => self.awaiting = Awaiting::Reply,
            Request::Finished(success) => {
                self.awaiting = Awaiting::Nothing;
                self.status = if *success { Status::Succeeded } else { Status::Failed };
            },
        }
        r
    }

    fn abort(&mut self, e: ProtocolError) -> ProtocolError {
        error!("Frame exchange aborted: {}", e);

        self.status = Status::Failed;
        self.awaiting = Awaiting::Nothing;
        e
    }
}
