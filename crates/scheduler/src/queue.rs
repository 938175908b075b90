//! 内存中的待执行任务工作集
//!
//! 只保存句柄 (id, priority, scheduled_for)，任务行在派发时从存储重新读取。

use std::cmp::{Ordering, Reverse};
use std::collections::HashMap;

use billing_domain::Task;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: Uuid,
    pub priority: i32,
    pub scheduled_for: DateTime<Utc>,
    seq: u64,
}

impl QueueEntry {
    /// priority 高者优先，其次 scheduled_for 早者，最后按入队顺序
    fn dispatch_order(&self, other: &Self) -> Ordering {
        (self.priority, Reverse(self.scheduled_for), Reverse(self.seq)).cmp(&(
            other.priority,
            Reverse(other.scheduled_for),
            Reverse(other.seq),
        ))
    }
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    entries: HashMap<Uuid, QueueEntry>,
    next_seq: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.entries.contains_key(id)
    }

    /// 按任务行插入或刷新句柄，返回是否为新插入
    pub fn upsert(&mut self, task: &Task) -> bool {
        self.push(task.id, task.priority, task.scheduled_for)
    }

    pub fn push(&mut self, id: Uuid, priority: i32, scheduled_for: DateTime<Utc>) -> bool {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.priority = priority;
            entry.scheduled_for = scheduled_for;
            return false;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            id,
            QueueEntry {
                id,
                priority,
                scheduled_for,
                seq,
            },
        );
        true
    }

    /// 放回一个已弹出的句柄，保留原有入队顺序
    pub fn restore(&mut self, entry: QueueEntry) {
        self.entries.entry(entry.id).or_insert(entry);
    }

    pub fn remove(&mut self, id: &Uuid) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn peek_due(&self, now: DateTime<Utc>) -> Option<&QueueEntry> {
        self.entries
            .values()
            .filter(|entry| entry.scheduled_for <= now)
            .max_by(|a, b| a.dispatch_order(b))
    }

    /// 弹出已到期句柄中排序最靠前的一个
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<QueueEntry> {
        let id = self.peek_due(now)?.id;
        self.entries.remove(&id)
    }

    /// 最早的 scheduled_for，用于计算空闲等待时长
    pub fn next_due_at(&self) -> Option<DateTime<Utc>> {
        self.entries.values().map(|entry| entry.scheduled_for).min()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_higher_priority_first() {
        let now = Utc::now();
        let mut queue = TaskQueue::new();
        let low = Uuid::new_v4();
        let high = Uuid::new_v4();
        queue.push(low, 1, now);
        queue.push(high, 10, now);

        assert_eq!(queue.pop_due(now).map(|e| e.id), Some(high));
        assert_eq!(queue.pop_due(now).map(|e| e.id), Some(low));
        assert!(queue.pop_due(now).is_none());
    }

    #[test]
    fn test_equal_priority_earlier_schedule_first() {
        let now = Utc::now();
        let mut queue = TaskQueue::new();
        let later = Uuid::new_v4();
        let earlier = Uuid::new_v4();
        queue.push(later, 5, now - Duration::seconds(1));
        queue.push(earlier, 5, now - Duration::seconds(10));

        assert_eq!(queue.pop_due(now).map(|e| e.id), Some(earlier));
    }

    #[test]
    fn test_ties_break_by_insertion_order() {
        let now = Utc::now();
        let mut queue = TaskQueue::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        queue.push(first, 0, now);
        queue.push(second, 0, now);

        assert_eq!(queue.pop_due(now).map(|e| e.id), Some(first));
    }

    #[test]
    fn test_future_entries_are_not_due() {
        let now = Utc::now();
        let mut queue = TaskQueue::new();
        let future = Uuid::new_v4();
        let due = Uuid::new_v4();
        queue.push(future, 100, now + Duration::seconds(5));
        queue.push(due, 0, now);

        assert_eq!(queue.pop_due(now).map(|e| e.id), Some(due));
        assert!(queue.pop_due(now).is_none());
        assert_eq!(queue.next_due_at(), Some(now + Duration::seconds(5)));
        assert_eq!(
            queue.pop_due(now + Duration::seconds(5)).map(|e| e.id),
            Some(future)
        );
    }

    #[test]
    fn test_upsert_refreshes_existing_handle() {
        let now = Utc::now();
        let mut queue = TaskQueue::new();
        let id = Uuid::new_v4();
        assert!(queue.push(id, 1, now));
        assert!(!queue.push(id, 7, now + Duration::seconds(3)));
        assert_eq!(queue.len(), 1);
        assert!(queue.pop_due(now).is_none());
        let entry = queue.pop_due(now + Duration::seconds(3)).unwrap();
        assert_eq!(entry.priority, 7);
    }

    #[test]
    fn test_remove_and_restore() {
        let now = Utc::now();
        let mut queue = TaskQueue::new();
        let id = Uuid::new_v4();
        queue.push(id, 0, now);
        let entry = queue.pop_due(now).unwrap();
        assert!(queue.is_empty());

        queue.restore(entry);
        assert!(queue.contains(&id));
        assert!(queue.remove(&id));
        assert!(!queue.remove(&id));
    }
}
