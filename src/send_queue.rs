//! Egress pacing. Two `Sender` implementations — direct and queued — chosen
//! once at configuration time, replacing the source's trick of swapping the
//! `send` method at runtime with a typed choice made up front.

use std::collections::VecDeque;
use std::time::Duration;

pub trait Sender {
    /// Lines to write to the transport right now as a result of this call
    /// (empty if the line was queued instead).
    fn enqueue(&mut self, line: String) -> Vec<String>;

    /// Called on the pacing tick (flood-protected mode only); pops at most
    /// one line.
    fn tick(&mut self) -> Vec<String> {
        Vec::new()
    }

    fn clear_queue(&mut self) {}
}

pub struct ImmediateSender;

impl Sender for ImmediateSender {
    fn enqueue(&mut self, line: String) -> Vec<String> {
        vec![line]
    }
}

#[derive(Default)]
pub struct QueuedSender {
    queue: VecDeque<String>,
}

impl Sender for QueuedSender {
    fn enqueue(&mut self, line: String) -> Vec<String> {
        self.queue.push_back(line);
        Vec::new()
    }

    fn tick(&mut self) -> Vec<String> {
        self.queue.pop_front().into_iter().collect()
    }

    fn clear_queue(&mut self) {
        self.queue.clear();
    }
}

pub struct SendQueue {
    sender: Box<dyn Sender>,
    flood_protected: bool,
    flood_protection_delay_ms: u64,
}

impl SendQueue {
    pub fn new(flood_protection: bool, flood_protection_delay_ms: u64) -> Self {
        let sender: Box<dyn Sender> = if flood_protection {
            Box::new(QueuedSender::default())
        } else {
            Box::new(ImmediateSender)
        };
        SendQueue {
            sender,
            flood_protected: flood_protection,
            flood_protection_delay_ms,
        }
    }

    /// Hand a serialized line to the active `Sender`. Returns the lines to
    /// write to the transport immediately (one, in immediate mode; none, in
    /// flood-protected mode — it'll come out on the next `tick`).
    pub fn enqueue(&mut self, line: String) -> Vec<String> {
        self.sender.enqueue(line)
    }

    /// Bypass pacing entirely — used for `QUIT` during shutdown, where
    /// waiting out the flood-protection interval would delay disconnect.
    pub fn send_immediate(&mut self, line: String) -> Vec<String> {
        vec![line]
    }

    pub fn clear_queue(&mut self) {
        self.sender.clear_queue();
    }

    pub fn tick(&mut self) -> Vec<String> {
        self.sender.tick()
    }

    pub fn is_flood_protected(&self) -> bool {
        self.flood_protected
    }

    pub fn flood_protection_delay(&self) -> Duration {
        Duration::from_millis(self.flood_protection_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_mode_writes_right_away() {
        let mut q = SendQueue::new(false, 1000);
        assert_eq!(q.enqueue("PING :x".into()), vec!["PING :x".to_owned()]);
    }

    #[test]
    fn flood_protected_mode_queues_until_tick() {
        let mut q = SendQueue::new(true, 1000);
        assert!(q.enqueue("PRIVMSG #a :hi".into()).is_empty());
        assert!(q.enqueue("PRIVMSG #a :there".into()).is_empty());
        assert_eq!(q.tick(), vec!["PRIVMSG #a :hi".to_owned()]);
        assert_eq!(q.tick(), vec!["PRIVMSG #a :there".to_owned()]);
        assert!(q.tick().is_empty());
    }

    #[test]
    fn clear_queue_drops_pending_frames() {
        let mut q = SendQueue::new(true, 1000);
        q.enqueue("PRIVMSG #a :hi".into());
        q.clear_queue();
        assert!(q.tick().is_empty());
    }

    #[test]
    fn send_immediate_bypasses_flood_protection() {
        let mut q = SendQueue::new(true, 1000);
        q.enqueue("PRIVMSG #a :queued".into());
        assert_eq!(q.send_immediate("QUIT :bye".into()), vec!["QUIT :bye".to_owned()]);
    }
}
