//! Dedicated background scheduler that runs async work on behalf of synchronous callers.

use std::{
	future::Future,
	sync::{
		Arc, Mutex,
		atomic::{AtomicBool, AtomicU64, Ordering},
		mpsc::{self as std_mpsc, RecvTimeoutError},
	},
	thread::{self, JoinHandle},
	time::{Duration, Instant},
};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::{
	runtime::Builder,
	sync::mpsc::{self, UnboundedSender, error::SendError},
};

use crate::{BoxFuture, Error, Result};
use bi_config::Scheduler;

pub const THREAD_NAME: &str = "bi-rag-scheduler";

const SHUTDOWN_POLL: Duration = Duration::from_millis(10);

type Job = BoxFuture<'static, ()>;

#[derive(Clone, Debug, Serialize)]
pub struct SchedulerStatus {
	pub shutdown: bool,
	pub alive: bool,
	/// Number of scheduler threads created so far. Greater than one means a dead scheduler was
	/// detected and replaced.
	pub generation: u64,
	pub thread_name: &'static str,
	#[serde(with = "crate::time_serde::option")]
	pub created_at: Option<OffsetDateTime>,
}

enum Command {
	Run(Job),
	Stop,
}

struct Worker {
	generation: u64,
	commands: UnboundedSender<Command>,
	handle: JoinHandle<()>,
	running: Arc<AtomicBool>,
	created_at: OffsetDateTime,
}
impl Worker {
	fn spawn(generation: u64, startup_timeout: Duration) -> Result<Self> {
		let (commands, mut inbox) = mpsc::unbounded_channel::<Command>();
		let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), String>>(1);
		let running = Arc::new(AtomicBool::new(false));
		let flag = running.clone();
		let handle = thread::Builder::new()
			.name(THREAD_NAME.to_string())
			.spawn(move || {
				let runtime = match Builder::new_current_thread().enable_all().build() {
					Ok(runtime) => runtime,
					Err(err) => {
						let _ = ready_tx.send(Err(err.to_string()));

						return;
					},
				};

				runtime.block_on(async move {
					flag.store(true, Ordering::SeqCst);

					let _ = ready_tx.send(Ok(()));

					while let Some(command) = inbox.recv().await {
						match command {
							Command::Run(job) => {
								tokio::spawn(job);
							},
							Command::Stop => break,
						}
					}

					flag.store(false, Ordering::SeqCst);
				});
			})
			.map_err(|err| Error::Initialization {
				message: format!("Failed to spawn the background scheduler thread: {err}."),
			})?;

		match ready_rx.recv_timeout(startup_timeout) {
			Ok(Ok(())) => {},
			Ok(Err(message)) => return Err(Error::Initialization { message }),
			Err(_) => {
				return Err(Error::Initialization {
					message: format!(
						"Background scheduler did not become ready within {startup_timeout:?}."
					),
				});
			},
		}

		tracing::info!(generation, thread = THREAD_NAME, "Background scheduler started.");

		Ok(Self { generation, commands, handle, running, created_at: OffsetDateTime::now_utc() })
	}

	fn is_alive(&self) -> bool {
		self.running.load(Ordering::SeqCst)
			&& !self.handle.is_finished()
			&& !self.commands.is_closed()
	}

	fn retire(self) {
		if self.handle.is_finished() && self.handle.join().is_err() {
			tracing::error!(generation = self.generation, "Background scheduler thread panicked.");
		}
	}
}

/// Owns the single scheduler thread. The thread is created on first use and recreated
/// transparently when a submission finds it dead.
pub struct BackgroundExecutor {
	cfg: Scheduler,
	worker: Mutex<Option<Worker>>,
	shutdown: AtomicBool,
	generations: AtomicU64,
}
impl BackgroundExecutor {
	pub fn new(cfg: Scheduler) -> Self {
		Self {
			cfg,
			worker: Mutex::new(None),
			shutdown: AtomicBool::new(false),
			generations: AtomicU64::new(0),
		}
	}

	pub fn submit_and_wait<T, F>(&self, operation: F) -> Result<T>
	where
		T: Send + 'static,
		F: Future<Output = Result<T>> + Send + 'static,
	{
		self.submit_and_wait_for(operation, Duration::from_secs(self.cfg.submit_timeout_secs))
	}

	/// Blocks the calling thread until `operation` finishes on the scheduler or `timeout`
	/// elapses. A timed-out operation keeps running and its result is discarded.
	pub fn submit_and_wait_for<T, F>(&self, operation: F, timeout: Duration) -> Result<T>
	where
		T: Send + 'static,
		F: Future<Output = Result<T>> + Send + 'static,
	{
		if self.shutdown.load(Ordering::SeqCst) {
			return Err(shut_down());
		}

		let (result_tx, result_rx) = std_mpsc::sync_channel::<Result<T>>(1);
		let job: Job = Box::pin(async move {
			let _ = result_tx.send(operation.await);
		});

		self.dispatch(job)?;

		match result_rx.recv_timeout(timeout) {
			Ok(result) => result,
			Err(RecvTimeoutError::Timeout) =>
				Err(Error::Timeout { operation: "background submission", timeout }),
			Err(RecvTimeoutError::Disconnected) => Err(Error::OperationDropped),
		}
	}

	pub fn is_healthy(&self) -> bool {
		if self.shutdown.load(Ordering::SeqCst) {
			return false;
		}

		let slot = self.worker.lock().unwrap_or_else(|err| err.into_inner());

		slot.as_ref().map(Worker::is_alive).unwrap_or(false)
	}

	pub fn status(&self) -> SchedulerStatus {
		let slot = self.worker.lock().unwrap_or_else(|err| err.into_inner());

		SchedulerStatus {
			shutdown: self.shutdown.load(Ordering::SeqCst),
			alive: slot.as_ref().map(Worker::is_alive).unwrap_or(false),
			generation: self.generations.load(Ordering::SeqCst),
			thread_name: THREAD_NAME,
			created_at: slot.as_ref().map(|worker| worker.created_at),
		}
	}

	/// Stops the scheduler and waits a bounded time for its thread. Idempotent.
	pub fn shutdown(&self) {
		if self.shutdown.swap(true, Ordering::SeqCst) {
			return;
		}

		let worker = self.worker.lock().unwrap_or_else(|err| err.into_inner()).take();
		let Some(worker) = worker else {
			return;
		};
		let timeout = Duration::from_secs(self.cfg.shutdown_timeout_secs);
		let deadline = Instant::now() + timeout;
		let _ = worker.commands.send(Command::Stop);

		while !worker.handle.is_finished() && Instant::now() < deadline {
			thread::sleep(SHUTDOWN_POLL);
		}

		if !worker.handle.is_finished() {
			tracing::warn!(
				generation = worker.generation,
				timeout_secs = timeout.as_secs(),
				"Background scheduler did not stop within the shutdown timeout."
			);

			return;
		}

		match worker.handle.join() {
			Ok(()) =>
				tracing::info!(generation = worker.generation, "Background scheduler stopped."),
			Err(_) => tracing::error!(
				generation = worker.generation,
				"Background scheduler thread panicked during shutdown."
			),
		}
	}

	fn dispatch(&self, job: Job) -> Result<()> {
		let mut slot = self.worker.lock().unwrap_or_else(|err| err.into_inner());

		// Re-checked under the lock so a concurrent shutdown never races a fresh worker in.
		if self.shutdown.load(Ordering::SeqCst) {
			return Err(shut_down());
		}

		let mut command = Command::Run(job);

		for _ in 0..2 {
			let worker = match slot.take() {
				Some(worker) if worker.is_alive() => worker,
				stale => {
					if let Some(dead) = stale {
						tracing::warn!(
							generation = dead.generation,
							"Background scheduler is not alive. Recreating it."
						);

						dead.retire();
					}

					self.spawn_worker()?
				},
			};

			match worker.commands.send(command) {
				Ok(()) => {
					*slot = Some(worker);

					return Ok(());
				},
				Err(SendError(returned)) => {
					tracing::warn!(
						generation = worker.generation,
						"Background scheduler rejected a submission."
					);

					command = returned;

					worker.retire();
				},
			}
		}

		Err(Error::IllegalState {
			message: "Background scheduler could not accept the submission.".to_string(),
		})
	}

	fn spawn_worker(&self) -> Result<Worker> {
		let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;

		Worker::spawn(generation, Duration::from_secs(self.cfg.startup_timeout_secs))
	}
}

fn shut_down() -> Error {
	Error::IllegalState { message: "Background scheduler is shut down.".to_string() }
}

#[cfg(test)]
mod tests {
	use std::{
		sync::{Arc, Barrier},
		thread,
		time::{Duration, Instant},
	};

	use super::*;

	fn executor() -> BackgroundExecutor {
		BackgroundExecutor::new(Scheduler {
			submit_timeout_secs: 5,
			startup_timeout_secs: 5,
			shutdown_timeout_secs: 2,
		})
	}

	fn wait_until(condition: impl Fn() -> bool) {
		let deadline = Instant::now() + Duration::from_secs(2);

		while !condition() && Instant::now() < deadline {
			thread::sleep(Duration::from_millis(5));
		}
	}

	#[test]
	fn concurrent_submissions_share_one_scheduler_thread() {
		let executor = Arc::new(executor());
		let barrier = Arc::new(Barrier::new(2));
		let handles = (0..2)
			.map(|_| {
				let executor = executor.clone();
				let barrier = barrier.clone();

				thread::spawn(move || {
					barrier.wait();

					executor
						.submit_and_wait(async { Ok(thread::current().id()) })
						.expect("Submission failed.")
				})
			})
			.collect::<Vec<_>>();
		let ids = handles
			.into_iter()
			.map(|handle| handle.join().expect("Submitter panicked."))
			.collect::<Vec<_>>();

		assert_eq!(ids[0], ids[1]);
		assert_ne!(ids[0], thread::current().id());
		assert_eq!(executor.status().generation, 1);
		assert!(executor.is_healthy());

		executor.shutdown();
	}

	#[test]
	fn operation_errors_propagate_unchanged() {
		let executor = executor();
		let err = executor
			.submit_and_wait::<(), _>(async {
				Err(Error::InvalidRequest { message: "Injected.".to_string() })
			})
			.expect_err("Expected the operation error.");

		assert!(matches!(err, Error::InvalidRequest { .. }));

		executor.shutdown();
	}

	#[test]
	fn submission_after_shutdown_is_illegal_state() {
		let executor = executor();

		executor.submit_and_wait(async { Ok(()) }).expect("Submission failed.");
		executor.shutdown();
		executor.shutdown();

		let err = executor.submit_and_wait(async { Ok(()) }).expect_err("Expected rejection.");

		assert!(matches!(err, Error::IllegalState { .. }));
		assert!(!executor.is_healthy());
		assert!(executor.status().shutdown);
	}

	#[test]
	fn slow_operation_times_out_without_breaking_the_scheduler() {
		let executor = executor();
		let err = executor
			.submit_and_wait_for(
				async {
					tokio::time::sleep(Duration::from_secs(2)).await;

					Ok(())
				},
				Duration::from_millis(50),
			)
			.expect_err("Expected timeout.");

		assert!(matches!(err, Error::Timeout { operation: "background submission", .. }));
		assert_eq!(executor.submit_and_wait(async { Ok(3) }).expect("Submission failed."), 3);

		executor.shutdown();
	}

	#[test]
	fn dead_scheduler_is_recreated_on_next_submission() {
		let executor = executor();

		executor.submit_and_wait(async { Ok(()) }).expect("Submission failed.");

		{
			let slot = executor.worker.lock().unwrap_or_else(|err| err.into_inner());
			let worker = slot.as_ref().expect("Worker must exist after a submission.");

			assert!(worker.commands.send(Command::Stop).is_ok());
		}

		wait_until(|| !executor.is_healthy());

		assert!(!executor.is_healthy());
		assert_eq!(executor.submit_and_wait(async { Ok(7) }).expect("Submission failed."), 7);
		assert_eq!(executor.status().generation, 2);
		assert!(executor.is_healthy());

		executor.shutdown();
	}

	#[test]
	fn shutdown_drops_in_flight_operations() {
		let executor = Arc::new(executor());
		let waiter = {
			let executor = executor.clone();

			thread::spawn(move || {
				executor.submit_and_wait(async {
					tokio::time::sleep(Duration::from_secs(30)).await;

					Ok(())
				})
			})
		};

		wait_until(|| executor.is_healthy());
		thread::sleep(Duration::from_millis(100));
		executor.shutdown();

		let result = waiter.join().expect("Submitter panicked.");

		assert!(matches!(result, Err(Error::OperationDropped)));
	}
}
