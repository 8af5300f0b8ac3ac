use crate::queue::gang::Gang;
use crate::queue::multilevel::MultiLevelList;
use crate::{Error, Priority, Result};

/// Pending queue of a resource pool under the PriorityFIFO policy.
///
/// Gangs are atomic units: a gang is dequeued whole or not at all, and the
/// head of a lane is never skipped in favour of a smaller gang behind it.
#[derive(Debug, Default)]
pub struct PriorityGangQueue {
    list: MultiLevelList<Gang>,
}

impl PriorityGangQueue {
    pub fn new() -> Self {
        Self {
            list: MultiLevelList::new(),
        }
    }

    pub fn enqueue(&mut self, gang: Gang) -> Result<()> {
        if gang.is_empty() {
            return Err(Error::invalid_argument("gang has no elements"));
        }
        self.list.push(gang.priority(), gang);
        Ok(())
    }

    /// Removes and returns up to `limit` gangs, highest priority first.
    pub fn dequeue_gang_list(&mut self, limit: usize) -> Result<Vec<Gang>> {
        if limit == 0 {
            return Err(Error::invalid_argument(
                "dequeue limit must be greater than zero",
            ));
        }
        if self.list.is_empty() {
            return Err(Error::not_found("pending queue is empty"));
        }
        let mut gangs = Vec::with_capacity(limit.min(self.list.len()));
        while gangs.len() < limit {
            match self.list.pop_highest() {
                Some((_, gang)) => gangs.push(gang),
                None => break,
            }
        }
        Ok(gangs)
    }

    /// The gang that would be dequeued next.
    pub fn peek(&self) -> Option<&Gang> {
        self.list.peek_highest().map(|(_, gang)| gang)
    }

    pub fn pop(&mut self) -> Option<Gang> {
        self.list.pop_highest().map(|(_, gang)| gang)
    }

    /// Number of gangs pending at the given priority.
    pub fn len(&self, priority: Priority) -> usize {
        self.list.level_len(priority)
    }

    pub fn total_len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Aggregate resource demand of all pending gangs.
    pub fn pending_resources(&self) -> crate::resources::Resources {
        let mut total = crate::resources::Resources::default();
        for (_, gang) in self.list.iter_desc() {
            total = total.add(&gang.resources());
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::Resources;
    use crate::tests::utils::{gang_with_priority, task_desc};

    fn sample_queue() -> PriorityGangQueue {
        let mut queue = PriorityGangQueue::new();
        queue.enqueue(gang_with_priority(1, 0, 0)).unwrap();
        queue.enqueue(gang_with_priority(1, 1, 1)).unwrap();
        queue.enqueue(gang_with_priority(2, 0, 2)).unwrap();
        queue.enqueue(gang_with_priority(2, 1, 2)).unwrap();
        queue
    }

    #[test]
    fn test_len_per_priority() {
        let queue = sample_queue();
        assert_eq!(queue.len(2), 2);
        assert_eq!(queue.len(1), 1);
        assert_eq!(queue.len(0), 1);
    }

    #[test]
    fn test_dequeue_priority_then_fifo() {
        let mut queue = sample_queue();
        let order: Vec<_> = (0..4)
            .map(|_| {
                let gangs = queue.dequeue_gang_list(1).unwrap();
                assert_eq!(gangs.len(), 1);
                let task = &gangs[0].tasks()[0];
                (task.priority, task.id)
            })
            .collect();
        // Highest priority first; FIFO within priority 2.
        assert_eq!(order[0].0, 2);
        assert_eq!(order[1].0, 2);
        assert!(order[0].1 < order[1].1);
        assert_eq!(order[2].0, 1);
        assert_eq!(order[3].0, 0);
    }

    #[test]
    fn test_dequeue_zero_is_invalid() {
        let mut queue = sample_queue();
        assert!(matches!(
            queue.dequeue_gang_list(0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_dequeue_empty_queue() {
        let mut queue = PriorityGangQueue::new();
        assert!(matches!(
            queue.dequeue_gang_list(1),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_gang_not_split() {
        let mut queue = PriorityGangQueue::new();
        let gang = Gang::new(vec![
            task_desc(7, 0, 3, Resources::new(1.0, 10.0, 0.0, 0.0)),
            task_desc(7, 1, 3, Resources::new(1.0, 10.0, 0.0, 0.0)),
        ])
        .unwrap();
        queue.enqueue(gang).unwrap();
        let gangs = queue.dequeue_gang_list(5).unwrap();
        assert_eq!(gangs.len(), 1);
        assert_eq!(gangs[0].len(), 2);
    }
}
