//! Queued steering and follow-up messages.
//!
//! Steering messages interrupt a run after the current tool finishes;
//! follow-up messages are delivered only when the run would otherwise stop.
//! Both queues support draining everything at once or one entry per
//! boundary.

use std::collections::VecDeque;

use strand_core::llm::Message;

/// How many queued messages one delivery boundary drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueMode {
    /// Drain the whole queue at the boundary.
    All,
    /// Deliver a single message per boundary.
    #[default]
    OneAtATime,
}

#[derive(Debug, Clone, Copy)]
enum QueueKind {
    Steering,
    FollowUp,
}

/// Paired steering and follow-up queues with independent delivery modes.
#[derive(Debug, Default)]
pub struct MessageQueue {
    steering: VecDeque<Message>,
    follow_up: VecDeque<Message>,
    steering_mode: QueueMode,
    follow_up_mode: QueueMode,
}

impl MessageQueue {
    /// Creates empty queues with the given modes.
    #[must_use]
    pub fn new(steering_mode: QueueMode, follow_up_mode: QueueMode) -> Self {
        Self {
            steering_mode,
            follow_up_mode,
            ..Self::default()
        }
    }

    /// Updates the delivery modes.
    pub fn set_modes(&mut self, steering: QueueMode, follow_up: QueueMode) {
        self.steering_mode = steering;
        self.follow_up_mode = follow_up;
    }

    /// Number of queued messages across both queues.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.steering.len() + self.follow_up.len()
    }

    /// Queues a steering message.
    pub fn push_steering(&mut self, message: Message) {
        self.steering.push_back(message);
    }

    /// Queues a follow-up message.
    pub fn push_follow_up(&mut self, message: Message) {
        self.follow_up.push_back(message);
    }

    /// Drains steering messages for one delivery boundary.
    pub fn pop_steering(&mut self) -> Vec<Message> {
        self.pop(QueueKind::Steering)
    }

    /// Drains follow-up messages for one delivery boundary.
    pub fn pop_follow_up(&mut self) -> Vec<Message> {
        self.pop(QueueKind::FollowUp)
    }

    fn pop(&mut self, kind: QueueKind) -> Vec<Message> {
        let (queue, mode) = match kind {
            QueueKind::Steering => (&mut self.steering, self.steering_mode),
            QueueKind::FollowUp => (&mut self.follow_up, self.follow_up_mode),
        };
        match mode {
            QueueMode::All => queue.drain(..).collect(),
            QueueMode::OneAtATime => queue.pop_front().into_iter().collect(),
        }
    }
}
