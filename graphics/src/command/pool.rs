//! Round-robin pools of command lists.

use super::CommandList;
use crate::error::GraphicsError;
use crate::types::QueueType;

/// Parameters of a [`CommandListPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandListPoolDesc {
    pub queue_type: QueueType,
    /// Lists in the pool. Must be at least `frames_in_flight`.
    pub num_command_lists: u32,
    /// Frames the CPU records ahead of the GPU.
    pub frames_in_flight: u32,
}

impl CommandListPoolDesc {
    pub fn new(queue_type: QueueType, num_command_lists: u32, frames_in_flight: u32) -> Self {
        Self {
            queue_type,
            num_command_lists,
            frames_in_flight,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), GraphicsError> {
        if self.num_command_lists == 0 {
            return Err(GraphicsError::InvalidParameter(
                "command list pool needs at least one list".into(),
            ));
        }
        if self.num_command_lists < self.frames_in_flight {
            return Err(GraphicsError::InvalidParameter(format!(
                "command list pool of {} lists cannot cover {} frames in flight",
                self.num_command_lists, self.frames_in_flight
            )));
        }
        Ok(())
    }
}

/// A fixed set of command lists on one queue, handed out round-robin.
///
/// [`get_next_in_flight`](Self::get_next_in_flight) returns the list after the
/// one returned last, wrapping around. With at least `frames_in_flight` lists
/// a list is only reused once the frame that recorded it has been waited on.
#[derive(Debug)]
pub struct CommandListPool {
    desc: CommandListPoolDesc,
    lists: Vec<CommandList>,
    next: usize,
}

impl CommandListPool {
    pub(crate) fn new(desc: CommandListPoolDesc, lists: Vec<CommandList>) -> Self {
        debug_assert_eq!(lists.len(), desc.num_command_lists as usize);
        Self {
            desc,
            lists,
            next: 0,
        }
    }

    pub fn desc(&self) -> &CommandListPoolDesc {
        &self.desc
    }

    pub fn queue_type(&self) -> QueueType {
        self.desc.queue_type
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    /// Next list in round-robin order.
    pub fn get_next_in_flight(&mut self) -> &mut CommandList {
        let index = self.next;
        self.next = (self.next + 1) % self.lists.len();
        &mut self.lists[index]
    }

    pub fn command_lists(&self) -> &[CommandList] {
        &self.lists
    }

    pub fn command_list(&self, index: usize) -> Option<&CommandList> {
        self.lists.get(index)
    }

    pub fn command_list_mut(&mut self, index: usize) -> Option<&mut CommandList> {
        self.lists.get_mut(index)
    }

    /// Wait for every list's last submission.
    pub fn wait_idle(&mut self) {
        for list in &mut self.lists {
            list.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_shallower_than_frames_in_flight_fails() {
        let desc = CommandListPoolDesc::new(QueueType::Graphics, 2, 3);
        assert!(matches!(
            desc.validate(),
            Err(GraphicsError::InvalidParameter(_))
        ));
        assert!(CommandListPoolDesc::new(QueueType::Graphics, 3, 3).validate().is_ok());
        assert!(CommandListPoolDesc::new(QueueType::Copy, 0, 0).validate().is_err());
    }

    #[cfg(feature = "headless")]
    #[test]
    fn test_round_robin_wraps() {
        let device = crate::test_utils::headless_device();
        let mut pool = device
            .create_command_list_pool(&CommandListPoolDesc::new(QueueType::Compute, 3, 3))
            .unwrap();
        let ids: Vec<u64> = (0..4).map(|_| pool.get_next_in_flight().id()).collect();
        assert_eq!(ids[3], ids[0]);
        assert_ne!(ids[0], ids[1]);
        assert_ne!(ids[1], ids[2]);
        assert!(pool.command_lists().iter().all(|l| l.queue_type() == QueueType::Compute));
    }
}
