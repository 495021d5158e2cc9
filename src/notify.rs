//! Asynchronous email handoff.
//!
//! Workflows never deliver email inline. They hand an [`EmailMessage`] to the
//! [`Mailer`], which pushes it onto an unbounded in-process channel and
//! returns immediately. A background dispatcher drains the channel and hands
//! each message to an [`EmailSender`]. Failed sends are retried with
//! exponential backoff and jitter until `max_attempts`, then dropped with an
//! error log. Delivery outcome never reaches the request that enqueued it.
//!
//! The default sender is [`LogEmailSender`], which only logs the message.

use anyhow::Result;
use rand::Rng;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{Instrument, debug, error, info, info_span, warn};

pub const TEMPLATE_INVITE: &str = "account/email/invite";
pub const TEMPLATE_CONFIRM: &str = "account/email/confirm";
pub const TEMPLATE_RESET_PASSWORD: &str = "account/email/reset_password";
pub const TEMPLATE_CHANGE_EMAIL: &str = "account/email/change_email";

#[derive(Clone, Debug, PartialEq)]
pub struct EmailMessage {
    pub recipient: String,
    pub subject: String,
    pub template: String,
    pub context: Value,
}

impl EmailMessage {
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        template: impl Into<String>,
        context: Value,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            subject: subject.into(),
            template: template.into(),
            context,
        }
    }
}

/// Email delivery abstraction used by the dispatcher.
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error to schedule a retry.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Sender that logs the message instead of delivering it.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            recipient = %message.recipient,
            subject = %message.subject,
            template = %message.template,
            context = %message.context,
            "email send stub"
        );
        Ok(())
    }
}

/// Sender that keeps every delivered message in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryEmailSender {
    delivered: Arc<Mutex<Vec<EmailMessage>>>,
}

impl MemoryEmailSender {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn delivered(&self) -> Vec<EmailMessage> {
        self.delivered
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }
}

impl EmailSender for MemoryEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        let mut delivered = self
            .delivered
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sender lock poisoned"))?;
        delivered.push(message.clone());
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct MailerConfig {
    subject_prefix: String,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl MailerConfig {
    /// Defaults: `[Backstage]` subject prefix, 5 attempts, 5s->5m backoff with jitter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subject_prefix: "[Backstage]".to_string(),
            max_attempts: 5,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn with_subject_prefix(mut self, prefix: String) -> Self {
        self.subject_prefix = prefix;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff_base_seconds(mut self, seconds: u64) -> Self {
        self.backoff_base = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_backoff_max_seconds(mut self, seconds: u64) -> Self {
        self.backoff_max = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let max_attempts = self.max_attempts.max(1);
        let backoff_max = self.backoff_max.max(self.backoff_base);
        Self {
            max_attempts,
            backoff_max,
            ..self
        }
    }

    #[must_use]
    pub fn subject_prefix(&self) -> &str {
        &self.subject_prefix
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        self.backoff_max
    }
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle used by workflows to enqueue outbound email.
#[derive(Clone, Debug)]
pub struct Mailer {
    queue: mpsc::UnboundedSender<EmailMessage>,
    subject_prefix: String,
}

impl Mailer {
    /// Create a mailer and spawn its dispatcher on the current runtime.
    #[must_use]
    pub fn spawn(
        sender: Arc<dyn EmailSender>,
        config: MailerConfig,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let config = config.normalize();
        let (queue, receiver) = mpsc::unbounded_channel();
        let mailer = Self {
            queue,
            subject_prefix: config.subject_prefix().to_string(),
        };
        let handle = spawn_dispatcher(receiver, sender, config);
        (mailer, handle)
    }

    /// Enqueue a message. Never blocks and never fails the caller.
    pub fn enqueue(&self, mut message: EmailMessage) {
        if !self.subject_prefix.is_empty() {
            message.subject = format!("{} {}", self.subject_prefix, message.subject);
        }
        debug!(recipient = %message.recipient, template = %message.template, "Email enqueued");
        if let Err(err) = self.queue.send(message) {
            error!(
                recipient = %err.0.recipient,
                "Email dispatcher is gone, dropping message"
            );
        }
    }
}

/// Drain the queue, delivering each message on its own task so a retrying
/// message does not hold back the rest.
pub fn spawn_dispatcher(
    mut receiver: mpsc::UnboundedReceiver<EmailMessage>,
    sender: Arc<dyn EmailSender>,
    config: MailerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            let sender = sender.clone();
            let config = config.clone();
            let span = info_span!("email.deliver", template = %message.template);
            tokio::spawn(deliver(sender, message, config).instrument(span));
        }
        debug!("Email queue closed, dispatcher exiting");
    })
}

async fn deliver(sender: Arc<dyn EmailSender>, message: EmailMessage, config: MailerConfig) {
    let mut attempt = 1;
    loop {
        match sender.send(&message) {
            Ok(()) => return,
            Err(err) if attempt >= config.max_attempts() => {
                error!(
                    recipient = %message.recipient,
                    attempts = attempt,
                    "Email delivery failed permanently: {err}"
                );
                return;
            }
            Err(err) => {
                let delay = backoff_delay(attempt, config.backoff_base(), config.backoff_max());
                warn!(
                    recipient = %message.recipient,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Email delivery failed, retrying: {err}"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << shift;
    let delay = base.checked_mul(factor).unwrap_or(max);
    jitter_delay(delay.min(max))
}

fn jitter_delay(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(half + jitter)
}
