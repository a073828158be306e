// src/daily.rs

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime, NaiveTime};
use tokio::time::sleep;
use tracing::{error, info, instrument};

use crate::bot::{deliver_all, Delivery, Outgoing};
use crate::extract::TableExtractor;
use crate::fetch::DocumentSource;
use crate::plan::{ResolvedDate, Subscription};
use crate::publication::{PlanService, Publication};
use crate::registry::UserRegistry;

pub const DATE_NOT_FOUND: &str = "Datum nicht gefunden";
pub const NO_PLAN_FOR_TOMORROW: &str = "keinen Vertretungsplan für Morgen gefunden";

/// The first `at` strictly after `now`.
pub fn next_run(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

/// Evening message for one subscriber: the report only if the plan is for
/// the day after `today`.
pub fn daily_message(
    publication: &Publication,
    today: NaiveDate,
    subscription: &Subscription,
) -> String {
    match publication.date {
        ResolvedDate::Unknown => DATE_NOT_FOUND.to_string(),
        ResolvedDate::Known(d) if Some(d) != today.succ_opt() => {
            NO_PLAN_FOR_TOMORROW.to_string()
        }
        ResolvedDate::Known(_) => publication.report_for(subscription),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobSummary {
    pub recipients: usize,
    pub failed_deliveries: usize,
}

/// Send every enabled user their daily message plus the document. If the
/// plan cannot be fetched, admins get the error and subscribers get nothing.
#[instrument(level = "info", skip_all, fields(today = %today))]
pub async fn run_daily_job<S, E, D>(
    service: &PlanService<S, E>,
    registry: &UserRegistry,
    delivery: &D,
    today: NaiveDate,
) -> Result<JobSummary>
where
    S: DocumentSource + 'static,
    E: TableExtractor + 'static,
    D: Delivery + ?Sized,
{
    let publication = match service.current(today).await {
        Ok(p) => p,
        Err(e) => {
            let text = format!("Vertretungsplan konnte nicht abgerufen werden: {}", e);
            let notices: Vec<_> = registry
                .admins()
                .await?
                .into_iter()
                .map(|admin| Outgoing::text(admin, text.as_str()))
                .collect();
            deliver_all(delivery, &notices).await;
            return Err(e).context("daily fetch failed");
        }
    };

    let users = registry.enabled_users().await?;
    let mut msgs = Vec::with_capacity(users.len() * 2);
    for (id, user) in &users {
        msgs.push(Outgoing::text(
            id,
            daily_message(&publication, today, &user.subscription),
        ));
        msgs.push(Outgoing::Document {
            to: id.clone(),
            path: publication.document.clone(),
        });
    }

    let failed = deliver_all(delivery, &msgs).await;
    let summary = JobSummary {
        recipients: users.len(),
        failed_deliveries: failed,
    };
    info!(recipients = summary.recipients, failed, "daily job done");
    Ok(summary)
}

/// Run the daily job at `at` local time, forever. Failures are logged and
/// the next day is awaited.
pub async fn run_forever<S, E, D>(
    service: &PlanService<S, E>,
    registry: &UserRegistry,
    delivery: &D,
    at: NaiveTime,
) where
    S: DocumentSource + 'static,
    E: TableExtractor + 'static,
    D: Delivery + ?Sized,
{
    loop {
        let now = Local::now().naive_local();
        let next = next_run(now, at);
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next = %next, wait_secs = wait.as_secs(), "waiting for daily run");
        sleep(wait).await;

        let today = Local::now().date_naive();
        if let Err(e) = run_daily_job(service, registry, delivery, today).await {
            error!(error = ?e, "daily job failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::delivery::tests::RecordingDelivery;
    use crate::plan::{ScheduleEntry, YearPolicy};
    use crate::publication::tests::{FakeExtractor, FakeSource};
    use crate::registry::ApprovalStatus;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn publication(date: ResolvedDate) -> Publication {
        Publication {
            date,
            entries: vec![ScheduleEntry {
                class_name: "6c".into(),
                period: "3".into(),
                original_teacher: "SCH".into(),
                substitute_subject: "".into(),
                room: "".into(),
                subject: "Englisch".into(),
                cancelled: true,
                note: None,
            }],
            warnings: vec![],
            document: "plan.pdf".into(),
            fetched_at: Local::now(),
        }
    }

    #[test]
    fn test_next_run() {
        let at = hm(22, 10);
        assert_eq!(
            next_run(ymd(2024, 3, 6).and_time(hm(8, 0)), at),
            ymd(2024, 3, 6).and_time(at)
        );
        assert_eq!(
            next_run(ymd(2024, 3, 6).and_time(at), at),
            ymd(2024, 3, 7).and_time(at)
        );
        assert_eq!(
            next_run(ymd(2024, 12, 31).and_time(hm(23, 0)), at),
            ymd(2025, 1, 1).and_time(at)
        );
    }

    #[test]
    fn test_daily_message_policy() {
        let sub = Subscription::from_tokens(["6c"]);
        let today = ymd(2024, 3, 6);

        assert_eq!(
            daily_message(&publication(ResolvedDate::Unknown), today, &sub),
            DATE_NOT_FOUND
        );
        assert_eq!(
            daily_message(&publication(ResolvedDate::Known(today)), today, &sub),
            NO_PLAN_FOR_TOMORROW
        );
        assert_eq!(
            daily_message(&publication(ResolvedDate::Known(ymd(2024, 3, 7))), today, &sub),
            "07.03.2024: 1 Eintrag gefunden:\n6c: 3. Stunde Englisch *Entfall*"
        );
    }

    async fn setup() -> (tempfile::TempDir, UserRegistry, PlanService<FakeSource, FakeExtractor>) {
        let tmp = tempfile::tempdir().unwrap();
        let registry = UserRegistry::new(tmp.path().join("users_db.json"));
        let now = Local::now();
        registry.register("1", "Ada", "Admin", now).await.unwrap();
        registry.set_admin("1", true).await.unwrap();
        registry.set_status("1", "1", ApprovalStatus::Enabled).await.unwrap();
        registry.register("2", "Max", "Muster", now).await.unwrap();
        registry.set_status("1", "2", ApprovalStatus::Enabled).await.unwrap();
        registry.add_subscription("2", ["6c"]).await.unwrap();
        registry.register("3", "Pending", "User", now).await.unwrap();

        let service = PlanService::new(
            FakeSource::default(),
            FakeExtractor::for_date("Klasse_moodle 7.3."),
            tmp.path().join("plan.pdf"),
            Duration::from_secs(60),
            YearPolicy::CurrentYear,
        );
        (tmp, registry, service)
    }

    #[tokio::test]
    async fn test_job_sends_to_enabled_users_only() -> Result<()> {
        let (_tmp, registry, service) = setup().await;
        let delivery = RecordingDelivery::default();

        let summary = run_daily_job(&service, &registry, &delivery, ymd(2024, 3, 6)).await?;
        assert_eq!(summary, JobSummary { recipients: 2, failed_deliveries: 0 });

        let sent = delivery.sent.lock().unwrap();
        assert_eq!(sent.len(), 4);
        assert!(sent.iter().all(|m| m.recipient() != "3"));
        assert_eq!(
            sent[0],
            Outgoing::text("1", "07.03.2024: keine Einträge gefunden")
        );
        assert_eq!(
            sent[2],
            Outgoing::text("2", "07.03.2024: 1 Eintrag gefunden:\n6c: 3. Stunde Englisch *Entfall*")
        );
        assert!(matches!(&sent[3], Outgoing::Document { to, .. } if to == "2"));
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_failure_only_notifies_admins() {
        let (_tmp, registry, service) = setup().await;
        service.source().fail.store(true, Ordering::SeqCst);
        let delivery = RecordingDelivery::default();

        let result = run_daily_job(&service, &registry, &delivery, ymd(2024, 3, 6)).await;
        assert!(result.is_err());

        let sent = delivery.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient(), "1");
        assert!(matches!(&sent[0], Outgoing::Text { text, .. } if text.contains("503")));
    }
}
