// src/bot/mod.rs
//! Chat commands and approval callbacks, independent of the messenger.

pub mod delivery;

pub use delivery::{deliver_all, ConsoleDelivery, Delivery, Outgoing};

use anyhow::Result;
use chrono::{Local, NaiveDate};
use tracing::{debug, error, info, warn};

use crate::error::RegistryError;
use crate::extract::TableExtractor;
use crate::fetch::DocumentSource;
use crate::plan::Subscription;
use crate::publication::PlanService;
use crate::registry::{ApprovalStatus, RegisterOutcome, UserRegistry};

pub const HELP: &str = "Sende /start um zu starten.\n\
Sende /get um den aktuellen Vertretungsplan abzuholen.\n\
Sende /add XX um eine Klasse zu abonnieren.\n\
Sende /rem XX um ein Abo zu löschen.";

const NOT_ENABLED: &str = "Du bist leider noch nicht freigeschaltet.";
const NOT_ADMIN: &str = "Admin Berechtigung notwendig!";
const NOT_REGISTERED: &str = "Du bist leider noch nicht registriert. Sende zuerst /start.";
const FETCH_FAILED: &str = "Der Vertretungsplan konnte gerade nicht abgerufen werden.";

/// Who sent a command.
#[derive(Debug, Clone)]
pub struct Sender {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Get,
    Add(Vec<String>),
    Remove(Vec<String>),
}

impl Command {
    /// Parse `/name arg...`; a `@botname` suffix on the command is ignored.
    pub fn parse(text: &str) -> Option<Self> {
        let mut words = text.split_whitespace();
        let head = words.next()?.strip_prefix('/')?;
        let name = head.split('@').next().unwrap_or(head);
        let args: Vec<String> = words.map(str::to_string).collect();
        match name {
            "start" => Some(Command::Start),
            "help" => Some(Command::Help),
            "get" => Some(Command::Get),
            "add" => Some(Command::Add(args)),
            "rem" => Some(Command::Remove(args)),
            _ => None,
        }
    }
}

/// Inline-keyboard answer of an admin: `accept <id>` or `decline <id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    Accept(String),
    Decline(String),
}

impl Callback {
    pub fn parse(data: &str) -> Option<Self> {
        let parts: Vec<&str> = data.split(' ').collect();
        let build: fn(String) -> Callback = match parts[0] {
            "accept" => Callback::Accept,
            "decline" => Callback::Decline,
            "" => {
                warn!("empty callback query");
                return None;
            }
            other => {
                warn!(cmd = other, "unknown callback");
                return None;
            }
        };
        if parts.len() != 2 {
            warn!(data, args = parts.len(), "callback with wrong argument count");
            return None;
        }
        Some(build(parts[1].to_string()))
    }
}

pub fn subscription_text(subscription: &Subscription) -> String {
    if subscription.is_empty() {
        "Du hast keine Klassen abonniert. Sende /add um Klassen hinzuzufügen.".to_string()
    } else {
        format!(
            "Du hast folgende Klassen abonniert:\n{}",
            subscription.tokens().collect::<Vec<_>>().join(", ")
        )
    }
}

fn subscription_reply(
    from: &Sender,
    result: Result<Subscription, RegistryError>,
) -> Result<Vec<Outgoing>> {
    match result {
        Ok(sub) => Ok(vec![Outgoing::text(&from.id, subscription_text(&sub))]),
        Err(RegistryError::NotRegistered(_)) => Ok(vec![Outgoing::text(&from.id, NOT_REGISTERED)]),
        Err(e) => Err(e.into()),
    }
}

/// Answers commands against the registry and the plan service.
pub struct Bot<'a, S, E> {
    registry: &'a UserRegistry,
    service: &'a PlanService<S, E>,
}

impl<'a, S, E> Bot<'a, S, E>
where
    S: DocumentSource + 'static,
    E: TableExtractor + 'static,
{
    pub fn new(registry: &'a UserRegistry, service: &'a PlanService<S, E>) -> Self {
        Self { registry, service }
    }

    /// Replies (and admin notifications) for one chat message. Text that is
    /// not a known command yields no replies.
    pub async fn handle_text(
        &self,
        from: &Sender,
        text: &str,
        today: NaiveDate,
    ) -> Result<Vec<Outgoing>> {
        let Some(cmd) = Command::parse(text) else {
            debug!(user_id = %from.id, "ignoring non-command text");
            return Ok(Vec::new());
        };
        match cmd {
            Command::Start => self.start(from).await,
            Command::Help => Ok(vec![Outgoing::text(&from.id, HELP)]),
            Command::Get => self.get(from, today).await,
            Command::Add(tokens) => {
                let result = self.registry.add_subscription(&from.id, &tokens).await;
                subscription_reply(from, result)
            }
            Command::Remove(tokens) => {
                let result = self.registry.remove_subscription(&from.id, &tokens).await;
                subscription_reply(from, result)
            }
        }
    }

    async fn start(&self, from: &Sender) -> Result<Vec<Outgoing>> {
        let (outcome, record) =
            self.registry
                .register(&from.id, &from.first_name, &from.last_name, Local::now())
                .await?;

        let mut reply = match outcome {
            RegisterOutcome::AlreadyEnabled => "Du bist bereits registriert und freigeschaltet.",
            RegisterOutcome::AwaitingApproval => {
                "Du bist bereits registriert. Bitte warte auf die Freischaltung."
            }
            RegisterOutcome::New => "Du bist jetzt registriert. Bitte warte auf die Freischaltung.",
        }
        .to_string();
        if record.admin {
            reply.push_str("\nDu bist Administrator.");
        }

        let mut out = vec![Outgoing::text(&from.id, reply)];
        if outcome.needs_approval() {
            let notice = format!("{} möchte Zugang haben.", record.display_name());
            for admin in self.registry.admins().await? {
                out.push(Outgoing::Text {
                    to: admin,
                    text: notice.clone(),
                    approval_for: Some(from.id.clone()),
                });
            }
        }
        Ok(out)
    }

    async fn get(&self, from: &Sender, today: NaiveDate) -> Result<Vec<Outgoing>> {
        let record = match self.registry.get(&from.id).await? {
            Some(r) if r.is_enabled() => r,
            _ => {
                warn!(user_id = %from.id, "unauthorized /get");
                return Ok(vec![Outgoing::text(&from.id, NOT_ENABLED)]);
            }
        };
        match self.service.current(today).await {
            Ok(publication) => Ok(vec![
                Outgoing::text(&from.id, publication.report_for(&record.subscription)),
                Outgoing::Document {
                    to: from.id.clone(),
                    path: publication.document.clone(),
                },
            ]),
            Err(e) => {
                error!(user_id = %from.id, error = %e, "/get failed");
                Ok(vec![Outgoing::text(&from.id, FETCH_FAILED)])
            }
        }
    }

    /// Handle an admin's accept/decline button press.
    pub async fn handle_callback(&self, from: &Sender, data: &str) -> Result<Vec<Outgoing>> {
        let Some(cb) = Callback::parse(data) else {
            return Ok(Vec::new());
        };
        let (target, status, notice) = match cb {
            Callback::Accept(t) => (t, ApprovalStatus::Enabled, "Du bist jetzt freigeschaltet."),
            Callback::Decline(t) => (
                t,
                ApprovalStatus::Declined,
                "Deine Freischaltung wurde abgelehnt.",
            ),
        };
        match self.registry.set_status(&from.id, &target, status).await {
            Ok(_) => {
                info!(admin = %from.id, target = %target, status = status.as_str(), "approval handled");
                Ok(vec![Outgoing::text(target, notice)])
            }
            Err(RegistryError::NotAdmin(_)) => Ok(vec![Outgoing::text(&from.id, NOT_ADMIN)]),
            Err(RegistryError::UnknownUser(u)) => {
                warn!(target = %u, "approval for unknown user");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::YearPolicy;
    use crate::publication::tests::{FakeExtractor, FakeSource};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn sender(id: &str, first: &str, last: &str) -> Sender {
        Sender {
            id: id.into(),
            first_name: first.into(),
            last_name: last.into(),
        }
    }

    fn texts(out: &[Outgoing]) -> Vec<(&str, &str)> {
        out.iter()
            .filter_map(|m| match m {
                Outgoing::Text { to, text, .. } => Some((to.as_str(), text.as_str())),
                Outgoing::Document { .. } => None,
            })
            .collect()
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        registry: UserRegistry,
        service: PlanService<FakeSource, FakeExtractor>,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let registry = UserRegistry::new(tmp.path().join("users_db.json"));
        let service = PlanService::new(
            FakeSource::default(),
            FakeExtractor::for_date("Klasse_moodle 7.3."),
            tmp.path().join("plan.pdf"),
            Duration::from_secs(60),
            YearPolicy::CurrentYear,
        );
        Fixture {
            _tmp: tmp,
            registry,
            service,
        }
    }

    impl Fixture {
        fn fail_fetches(&self) {
            self.service.source().fail.store(true, Ordering::SeqCst);
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 6).unwrap()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/start"), Some(Command::Start));
        assert_eq!(Command::parse("/get@plan_bot"), Some(Command::Get));
        assert_eq!(
            Command::parse("/add 6c  7A"),
            Some(Command::Add(vec!["6c".into(), "7A".into()]))
        );
        assert_eq!(Command::parse("/rem"), Some(Command::Remove(vec![])));
        assert_eq!(Command::parse("hallo"), None);
        assert_eq!(Command::parse("/unknown"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn test_parse_callbacks() {
        assert_eq!(Callback::parse("accept 42"), Some(Callback::Accept("42".into())));
        assert_eq!(Callback::parse("decline 42"), Some(Callback::Decline("42".into())));
        assert_eq!(Callback::parse("accept"), None);
        assert_eq!(Callback::parse("accept 1 2"), None);
        assert_eq!(Callback::parse("ban 42"), None);
        assert_eq!(Callback::parse(""), None);
    }

    #[tokio::test]
    async fn test_start_notifies_admins_and_accept_enables() -> Result<()> {
        let f = fixture();
        let bot = Bot::new(&f.registry, &f.service);
        let admin = sender("1", "Ada", "Admin");
        let user = sender("2", "Max", "Muster");

        bot.handle_text(&admin, "/start", today()).await?;
        f.registry.set_admin("1", true).await?;

        let out = bot.handle_text(&user, "/start", today()).await?;
        assert_eq!(
            texts(&out),
            vec![
                ("2", "Du bist jetzt registriert. Bitte warte auf die Freischaltung."),
                ("1", "Max Muster möchte Zugang haben."),
            ]
        );
        assert!(matches!(&out[1], Outgoing::Text { approval_for: Some(id), .. } if id == "2"));

        // not yet enabled
        let out = bot.handle_text(&user, "/get", today()).await?;
        assert_eq!(texts(&out), vec![("2", NOT_ENABLED)]);

        // users cannot approve themselves
        let out = bot.handle_callback(&user, "accept 2").await?;
        assert_eq!(texts(&out), vec![("2", NOT_ADMIN)]);

        let out = bot.handle_callback(&admin, "accept 2").await?;
        assert_eq!(texts(&out), vec![("2", "Du bist jetzt freigeschaltet.")]);

        let out = bot.handle_text(&user, "/start", today()).await?;
        assert_eq!(
            texts(&out),
            vec![("2", "Du bist bereits registriert und freigeschaltet.")]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_subscription_commands() -> Result<()> {
        let f = fixture();
        let bot = Bot::new(&f.registry, &f.service);
        let user = sender("3", "Eva", "Schüler");

        let out = bot.handle_text(&user, "/add 6c", today()).await?;
        assert_eq!(texts(&out), vec![("3", NOT_REGISTERED)]);

        bot.handle_text(&user, "/start", today()).await?;
        let out = bot.handle_text(&user, "/add 6C 7a", today()).await?;
        assert_eq!(
            texts(&out),
            vec![("3", "Du hast folgende Klassen abonniert:\n6c, 7a")]
        );
        let out = bot.handle_text(&user, "/rem 6c 7a", today()).await?;
        assert_eq!(
            texts(&out),
            vec![(
                "3",
                "Du hast keine Klassen abonniert. Sende /add um Klassen hinzuzufügen."
            )]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_get_sends_report_and_document() -> Result<()> {
        let f = fixture();
        let bot = Bot::new(&f.registry, &f.service);
        let admin = sender("1", "Ada", "Admin");

        bot.handle_text(&admin, "/start", today()).await?;
        f.registry.set_admin("1", true).await?;
        bot.handle_callback(&admin, "accept 1").await?;
        bot.handle_text(&admin, "/add 7a", today()).await?;

        let out = bot.handle_text(&admin, "/get", today()).await?;
        assert_eq!(
            texts(&out),
            vec![(
                "1",
                "07.03.2024: 1 Eintrag gefunden:\n7a: 5. Stunde Bio anstatt Chemie in Raum B12 bei BER"
            )]
        );
        assert!(matches!(&out[1], Outgoing::Document { to, .. } if to == "1"));

        // a failing fetch is reported, never replaced by a stale report
        let fresh = fixture();
        let bot = Bot::new(&fresh.registry, &fresh.service);
        bot.handle_text(&admin, "/start", today()).await?;
        fresh.registry.set_admin("1", true).await?;
        bot.handle_callback(&admin, "accept 1").await?;
        fresh.fail_fetches();
        let out = bot.handle_text(&admin, "/get", today()).await?;
        assert_eq!(texts(&out), vec![("1", FETCH_FAILED)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_help_and_plain_text() -> Result<()> {
        let f = fixture();
        let bot = Bot::new(&f.registry, &f.service);
        let user = sender("5", "A", "B");
        let out = bot.handle_text(&user, "/help", today()).await?;
        assert_eq!(texts(&out), vec![("5", HELP)]);
        assert!(bot.handle_text(&user, "guten Morgen", today()).await?.is_empty());
        Ok(())
    }
}
