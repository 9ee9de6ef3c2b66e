use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use deferq_core::{DeferResult, EnqueueOptions, JobId, ReceiverDescriptor};
use deferq_delay::{
    Arguments, Deferrable, Deliverable, Dispatcher, Returned, TypeDef, TypeRef, TypeRegistry,
};
use deferq_queue::JobQueue;

pub const MY_MODEL: TypeRef = TypeRef::model("MyModel");
pub const USER_MAILER: TypeRef = TypeRef::mailer("UserMailer");
pub const REPORTS: TypeRef = TypeRef::class("Reports");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub email: String,
}

impl Deferrable for User {
    fn receiver_descriptor(&self) -> DeferResult<ReceiverDescriptor> {
        ReceiverDescriptor::instance("User", &self.id)
    }
}

/// Message that is "sent" by logging it.
#[derive(Debug)]
pub struct LoggedMessage {
    pub to: String,
    pub subject: String,
}

impl Deliverable for LoggedMessage {
    fn deliver_now(self: Box<Self>) -> anyhow::Result<()> {
        tracing::info!(to = %self.to, subject = %self.subject, "mail sent");
        Ok(())
    }

    fn summary(&self) -> String {
        format!("{} to {}", self.subject, self.to)
    }
}

pub fn sample_users() -> Vec<User> {
    vec![
        User {
            id: 1,
            email: "ada@example.com".into(),
        },
        User {
            id: 2,
            email: "grace@example.com".into(),
        },
    ]
}

/// Types the worker can replay calls on.
pub fn build_registry(users: &[User]) -> TypeRegistry {
    let directory: Arc<HashMap<u64, User>> =
        Arc::new(users.iter().map(|u| (u.id, u.clone())).collect());
    let lookup = Arc::clone(&directory);

    TypeRegistry::new()
        .with(
            TypeDef::module("MyModel").type_method("long_class_method", |_| {
                tracing::info!("MyModel.long_class_method ran");
                Ok(Returned::Nothing)
            }),
        )
        .with(
            TypeDef::<User>::new("User")
                .with_loader(move |identity| {
                    let id: u64 = serde_json::from_value(identity.clone())?;
                    lookup
                        .get(&id)
                        .cloned()
                        .with_context(|| format!("user {id} not found"))
                })
                .instance_method("mark_as_awesome", |user, _| {
                    tracing::info!(user_id = user.id, "user marked as awesome");
                    Ok(Returned::Value(true.into()))
                }),
        )
        .with(TypeDef::module("UserMailer").type_method("greetings", move |call| {
            let user_id: u64 = call.arg(0)?;
            let visits: u32 = call.arg(1)?;
            let user = directory
                .get(&user_id)
                .with_context(|| format!("user {user_id} not found"))?;
            Ok(Returned::message(LoggedMessage {
                to: user.email.clone(),
                subject: format!("Thanks for your {visits} visits"),
            }))
        }))
        .with(TypeDef::module("Reports").type_method_kw("rebuild", |call| {
            let kind: String = call.arg(0)?;
            let full = call.kwarg::<bool>("full")?.unwrap_or(false);
            tracing::info!(kind = %kind, full, "report rebuilt");
            Ok(Returned::Nothing)
        }))
}

/// Defer one call of each kind. The mailer call runs after `greeting_delay`.
pub fn enqueue_samples<Q: JobQueue>(
    dispatcher: &Dispatcher<Q>,
    users: &[User],
    greeting_delay: Duration,
) -> DeferResult<Vec<JobId>> {
    let mut ids = Vec::new();

    ids.push(
        MY_MODEL
            .defer(dispatcher)
            .call("long_class_method", Arguments::new())?,
    );

    for user in users {
        ids.push(user.defer(dispatcher).call("mark_as_awesome", Arguments::new())?);
        ids.push(
            USER_MAILER
                .defer_for(dispatcher, greeting_delay)
                .options(EnqueueOptions::new().queue("mailers").retry(3))
                .call("greetings", Arguments::new().arg(&user.id).arg(&3))?,
        );
    }

    ids.push(
        REPORTS
            .defer(dispatcher)
            .queue("low")
            .call("rebuild", Arguments::new().arg("monthly").kwarg("full", &true))?,
    );

    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use deferq_delay::DeferredCallExecutor;
    use deferq_queue::{InMemoryJobQueue, Worker};

    #[test]
    fn samples_run_to_completion() {
        let users = sample_users();
        let registry = Arc::new(build_registry(&users));
        let queue = InMemoryJobQueue::arc();
        let dispatcher = Dispatcher::new(Arc::clone(&queue)).with_registry(Arc::clone(&registry));

        let ids = enqueue_samples(&dispatcher, &users, Duration::ZERO).unwrap();
        assert_eq!(ids.len(), 6);
        assert_eq!(queue.queue_size("mailers").unwrap(), 2);
        assert_eq!(queue.queue_size("low").unwrap(), 1);

        let mut worker = Worker::new(Arc::clone(&queue));
        Arc::new(DeferredCallExecutor::new(registry)).register(&mut worker);

        assert_eq!(worker.drain(&[]).unwrap(), 6);
        assert!(queue.list_dead_letters(10).unwrap().is_empty());
    }

    #[test]
    fn greetings_wait_in_the_scheduled_set() {
        let users = sample_users();
        let dispatcher = Dispatcher::new(InMemoryJobQueue::arc());

        enqueue_samples(&dispatcher, &users, Duration::from_secs(3600)).unwrap();

        assert_eq!(dispatcher.queue().scheduled_size().unwrap(), 2);
        assert_eq!(dispatcher.queue().queue_size("mailers").unwrap(), 0);
    }
}
