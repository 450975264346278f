//! Module for the two-tier thumbnail job queue and its de-duplication

use std::{
	collections::{
		HashSet,
		VecDeque,
	},
	path::PathBuf,
};

/// The tier of a thumbnail job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobTier {
	/// The single representative frame, shown as the icon
	Priority,
	/// The long running job (filmstrip or cover)
	Secondary,
}

impl std::fmt::Display for JobTier {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		return match self {
			Self::Priority => write!(f, "priority"),
			Self::Secondary => write!(f, "secondary"),
		};
	}
}

/// A queued job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
	/// The media file to generate thumbnails for
	pub source_path:     PathBuf,
	/// The title as given by the caller
	pub title:           String,
	/// The sanitized title, used for de-duplication and as output directory
	pub sanitized_title: String,
	/// Which job to run
	pub tier:            JobTier,
}

/// Decide which tier a title still needs, if any
///
/// - missing priority thumbnail: [JobTier::Priority]
/// - existing priority thumbnail and secondary not done: [JobTier::Secondary]
/// - otherwise: nothing to do
#[must_use]
pub fn needed_tier(priority_exists: bool, secondary_done: bool) -> Option<JobTier> {
	if !priority_exists {
		return Some(JobTier::Priority);
	}
	if !secondary_done {
		return Some(JobTier::Secondary);
	}

	return None;
}

/// Two-tier job queue with the set of currently active titles
///
/// Priority requests are prepended (newest first), secondary requests are appended (oldest first).
/// A title is never queued twice and never queued while it is active.
#[derive(Debug, Default)]
pub struct JobQueue {
	priority:  VecDeque<QueueEntry>,
	secondary: VecDeque<QueueEntry>,
	active:    HashSet<String>,
}

impl JobQueue {
	/// Create a new empty queue
	#[must_use]
	pub fn new() -> Self {
		return Self::default();
	}

	/// Get whether `sanitized_title` currently has a job running
	pub fn is_active(&self, sanitized_title: &str) -> bool {
		return self.active.contains(sanitized_title);
	}

	/// Get whether `sanitized_title` is waiting in any tier
	pub fn is_queued(&self, sanitized_title: &str) -> bool {
		return self.position(JobTier::Priority, sanitized_title).is_some()
			|| self.position(JobTier::Secondary, sanitized_title).is_some();
	}

	/// Find the position of `sanitized_title` in the queue of `tier`
	fn position(&self, tier: JobTier, sanitized_title: &str) -> Option<usize> {
		let queue = match tier {
			JobTier::Priority => &self.priority,
			JobTier::Secondary => &self.secondary,
		};

		return queue.iter().position(|v| return v.sanitized_title == sanitized_title);
	}

	/// Add `entry` to the queue of its tier
	///
	/// Returns `false` if the entry was not added, because the title is active or already waiting for the same or a earlier tier.
	/// A repeated priority request moves the title to the front, a priority request replaces a waiting secondary request.
	pub fn push(&mut self, entry: QueueEntry) -> bool {
		if self.is_active(&entry.sanitized_title) {
			return false;
		}

		match entry.tier {
			JobTier::Priority => {
				if let Some(pos) = self.position(JobTier::Priority, &entry.sanitized_title) {
					self.priority.remove(pos);
				}
				// the secondary job is re-queued once the priority job is done
				if let Some(pos) = self.position(JobTier::Secondary, &entry.sanitized_title) {
					self.secondary.remove(pos);
				}
				self.priority.push_front(entry);
			},
			JobTier::Secondary => {
				if self.is_queued(&entry.sanitized_title) {
					return false;
				}
				self.secondary.push_back(entry);
			},
		}

		return true;
	}

	/// Take the next job, always preferring the priority tier, and mark its title as active
	pub fn next(&mut self) -> Option<QueueEntry> {
		let entry = self.priority.pop_front().or_else(|| return self.secondary.pop_front())?;

		self.active.insert(entry.sanitized_title.clone());

		return Some(entry);
	}

	/// Mark the job of `sanitized_title` as finished
	pub fn finish(&mut self, sanitized_title: &str) {
		self.active.remove(sanitized_title);
	}

	/// Remove all waiting jobs, returns how many were removed
	pub fn clear(&mut self) -> usize {
		let removed = self.priority.len() + self.secondary.len();
		self.priority.clear();
		self.secondary.clear();

		return removed;
	}

	/// Get the number of waiting jobs in `tier`
	pub fn len_of(&self, tier: JobTier) -> usize {
		return match tier {
			JobTier::Priority => self.priority.len(),
			JobTier::Secondary => self.secondary.len(),
		};
	}

	/// Get the number of all waiting jobs
	pub fn len(&self) -> usize {
		return self.priority.len() + self.secondary.len();
	}

	/// Get whether no job is waiting
	pub fn is_empty(&self) -> bool {
		return self.priority.is_empty() && self.secondary.is_empty();
	}

	/// Get whether no job is waiting or running
	pub fn is_idle(&self) -> bool {
		return self.is_empty() && self.active.is_empty();
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn entry(title: &str, tier: JobTier) -> QueueEntry {
		return QueueEntry {
			source_path: PathBuf::from(format!("/media/{title}.mkv")),
			title: title.to_owned(),
			sanitized_title: title.to_owned(),
			tier,
		};
	}

	fn drain(queue: &mut JobQueue) -> Vec<(String, JobTier)> {
		let mut order = Vec::new();
		while let Some(next) = queue.next() {
			queue.finish(&next.sanitized_title);
			order.push((next.sanitized_title, next.tier));
		}

		return order;
	}

	#[test]
	fn test_needed_tier() {
		assert_eq!(Some(JobTier::Priority), needed_tier(false, false));
		assert_eq!(Some(JobTier::Priority), needed_tier(false, true));
		assert_eq!(Some(JobTier::Secondary), needed_tier(true, false));
		assert_eq!(None, needed_tier(true, true));
	}

	#[test]
	fn test_idempotent_push() {
		let mut queue = JobQueue::new();

		assert!(queue.push(entry("a", JobTier::Priority)));
		assert!(queue.push(entry("a", JobTier::Priority)));
		assert_eq!(1, queue.len());

		assert!(queue.push(entry("b", JobTier::Secondary)));
		assert!(!queue.push(entry("b", JobTier::Secondary)));
		assert_eq!(2, queue.len());
	}

	#[test]
	fn test_priority_before_secondary() {
		let mut queue = JobQueue::new();

		queue.push(entry("s1", JobTier::Secondary));
		queue.push(entry("p1", JobTier::Priority));
		queue.push(entry("s2", JobTier::Secondary));
		queue.push(entry("p2", JobTier::Priority));

		assert_eq!(
			vec![
				("p2".to_owned(), JobTier::Priority),
				("p1".to_owned(), JobTier::Priority),
				("s1".to_owned(), JobTier::Secondary),
				("s2".to_owned(), JobTier::Secondary),
			],
			drain(&mut queue)
		);
	}

	#[test]
	fn test_repeated_priority_moves_to_front() {
		let mut queue = JobQueue::new();

		queue.push(entry("a", JobTier::Priority));
		queue.push(entry("b", JobTier::Priority));
		queue.push(entry("a", JobTier::Priority));

		let order: Vec<String> = drain(&mut queue).into_iter().map(|v| return v.0).collect();
		assert_eq!(vec!["a".to_owned(), "b".to_owned()], order);
	}

	#[test]
	fn test_priority_replaces_secondary() {
		let mut queue = JobQueue::new();

		queue.push(entry("a", JobTier::Secondary));
		queue.push(entry("a", JobTier::Priority));

		assert_eq!(1, queue.len());
		assert_eq!(0, queue.len_of(JobTier::Secondary));

		// a waiting priority job is not duplicated into secondary
		assert!(!queue.push(entry("a", JobTier::Secondary)));
	}

	#[test]
	fn test_active_is_not_queued() {
		let mut queue = JobQueue::new();

		queue.push(entry("a", JobTier::Priority));
		let running = queue.next().expect("Expected a job");
		assert!(queue.is_active("a"));

		assert!(!queue.push(entry("a", JobTier::Priority)));
		assert!(!queue.push(entry("a", JobTier::Secondary)));
		assert!(queue.is_empty());
		assert!(!queue.is_idle());

		queue.finish(&running.sanitized_title);
		assert!(queue.is_idle());
		assert!(queue.push(entry("a", JobTier::Secondary)));
	}

	#[test]
	fn test_clear() {
		let mut queue = JobQueue::new();

		queue.push(entry("a", JobTier::Priority));
		queue.push(entry("b", JobTier::Secondary));

		assert_eq!(2, queue.clear());
		assert!(queue.next().is_none());
	}
}
