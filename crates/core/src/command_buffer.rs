//! Requests parked while their session has a protocol exchange outstanding.

use std::collections::VecDeque;

use crate::{
    client_events::{FlowCallback, FlowNotification, QosStatus},
    tspec::TspecInfo,
    types::{AccessCategory, FlowId, SessionId, Slot},
};

#[derive(Debug, Clone)]
pub struct SetupRequest {
    pub flow_id: FlowId,
    pub ac: AccessCategory,
    pub tspec: TspecInfo,
    pub callback: FlowCallback,
}

impl SetupRequest {
    /// Reports an outcome for a setup that never made it into the registry.
    pub(crate) fn notify(&self, session: SessionId, status: QosStatus) {
        tracing::debug!(flow = %self.flow_id, %session, ac = %self.ac, ?status, "notifying buffered setup owner");
        self.callback.notify(FlowNotification {
            flow_id: self.flow_id,
            session,
            ac: self.ac,
            status,
            tspec: None,
        });
    }
}

#[derive(Debug, Clone)]
pub enum BufferedCommand {
    Setup(SetupRequest),
    Modify { flow: FlowId, tspec: TspecInfo },
    Release { flow: FlowId },
    /// Re-admit an admitted slot on the AP reached by a legacy roam.
    Renew { ac: AccessCategory, slot: Slot },
    /// Admit the flows a split moved onto `slot`.
    Regroup { ac: AccessCategory, slot: Slot },
    /// Tear down the TSPEC left on a slot whose flows were merged away.
    Teardown {
        ac: AccessCategory,
        slot: Slot,
        tspec: TspecInfo,
    },
}

impl BufferedCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            BufferedCommand::Setup(_) => "setup",
            BufferedCommand::Modify { .. } => "modify",
            BufferedCommand::Release { .. } => "release",
            BufferedCommand::Renew { .. } => "renew",
            BufferedCommand::Regroup { .. } => "regroup",
            BufferedCommand::Teardown { .. } => "teardown",
        }
    }
}

/// FIFO of buffered commands for one session.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    queue: VecDeque<BufferedCommand>,
}

impl CommandBuffer {
    pub fn buffer(&mut self, command: BufferedCommand) {
        tracing::debug!(kind = command.kind(), queued = self.queue.len(), "buffering command");
        self.queue.push_back(command);
    }

    /// Queues `command` ahead of everything already waiting.
    pub fn buffer_front(&mut self, command: BufferedCommand) {
        tracing::debug!(kind = command.kind(), queued = self.queue.len(), "buffering command at head");
        self.queue.push_front(command);
    }

    /// Queues `commands` ahead of everything waiting, keeping their order.
    pub fn buffer_front_all(&mut self, commands: impl IntoIterator<Item = BufferedCommand>) {
        let commands: Vec<_> = commands.into_iter().collect();
        for command in commands.into_iter().rev() {
            self.buffer_front(command);
        }
    }

    pub fn pop(&mut self) -> Option<BufferedCommand> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Whether a setup holding `flow` is still waiting.
    pub fn holds_setup(&self, flow: FlowId) -> bool {
        self.queue
            .iter()
            .any(|c| matches!(c, BufferedCommand::Setup(req) if req.flow_id == flow))
    }

    pub fn holds_release(&self, flow: FlowId) -> bool {
        self.queue
            .iter()
            .any(|c| matches!(c, BufferedCommand::Release { flow: f } if *f == flow))
    }

    pub fn take_all(&mut self) -> Vec<BufferedCommand> {
        self.queue.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(id: u32) -> BufferedCommand {
        BufferedCommand::Release {
            flow: FlowId::new(id),
        }
    }

    fn id_of(cmd: &BufferedCommand) -> u32 {
        match cmd {
            BufferedCommand::Release { flow } => flow.as_u32(),
            _ => unreachable!(),
        }
    }

    #[test]
    fn fifo_with_head_insertion() {
        let mut buffer = CommandBuffer::default();
        buffer.buffer(release(1));
        buffer.buffer(release(2));
        buffer.buffer_front(release(0));
        buffer.buffer_front_all([release(10), release(11)]);

        let order: Vec<_> = std::iter::from_fn(|| buffer.pop()).map(|c| id_of(&c)).collect();
        assert_eq!(order, vec![10, 11, 0, 1, 2]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn finds_buffered_setup() {
        let mut buffer = CommandBuffer::default();
        buffer.buffer(BufferedCommand::Setup(SetupRequest {
            flow_id: FlowId::new(5),
            ac: AccessCategory::Voice,
            tspec: TspecInfo::default(),
            callback: FlowCallback::noop(),
        }));
        assert!(buffer.holds_setup(FlowId::new(5)));
        assert!(!buffer.holds_setup(FlowId::new(6)));
    }
}
