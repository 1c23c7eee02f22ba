use std::{fmt, sync::Arc};

use chrono::Utc;

use crate::{
    error::Result,
    event::RequestEventType,
    permissions::Identity,
    request::Request,
};

/// Result of running an action. `event` names a system entry to append to the
/// request's timeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionOutcome {
    pub event: Option<RequestEventType>,
}

/// A handler bound to one request for the duration of one call.
pub trait RequestAction: Send {
    fn name(&self) -> &str;

    fn request(&self) -> &Request;

    fn can_execute(&self, identity: &Identity) -> bool;

    fn execute(&mut self, identity: &Identity) -> Result<ActionOutcome>;

    fn into_request(self: Box<Self>) -> Request;
}

type BuildAction = dyn Fn(Request) -> Box<dyn RequestAction> + Send + Sync;

/// Constructs a fresh handler per call with the request as context.
#[derive(Clone)]
pub struct ActionFactory(Arc<BuildAction>);

impl ActionFactory {
    pub fn new<F>(build: F) -> Self
    where
        F: Fn(Request) -> Box<dyn RequestAction> + Send + Sync + 'static,
    {
        Self(Arc::new(build))
    }

    pub fn build(&self, request: Request) -> Box<dyn RequestAction> {
        (self.0)(request)
    }
}

impl fmt::Debug for ActionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ActionFactory")
    }
}

/// Moves a request from one of `from` to `to`.
pub struct StatusTransition {
    name: &'static str,
    request: Request,
    from: &'static [&'static str],
    to: &'static str,
    event: Option<RequestEventType>,
}

impl StatusTransition {
    pub fn factory(
        name: &'static str,
        from: &'static [&'static str],
        to: &'static str,
        event: Option<RequestEventType>,
    ) -> ActionFactory {
        ActionFactory::new(move |request| {
            Box::new(StatusTransition {
                name,
                request,
                from,
                to,
                event: event.clone(),
            })
        })
    }
}

impl RequestAction for StatusTransition {
    fn name(&self) -> &str {
        self.name
    }

    fn request(&self) -> &Request {
        &self.request
    }

    fn can_execute(&self, _identity: &Identity) -> bool {
        self.from.contains(&self.request.status.as_str())
    }

    fn execute(&mut self, _identity: &Identity) -> Result<ActionOutcome> {
        self.request.status = self.to.to_string();
        self.request.updated_at = Utc::now();
        Ok(ActionOutcome {
            event: self.event.clone(),
        })
    }

    fn into_request(self: Box<Self>) -> Request {
        self.request
    }
}

pub fn submit() -> ActionFactory {
    StatusTransition::factory("submit", &["draft"], "open", None)
}

pub fn accept() -> ActionFactory {
    StatusTransition::factory("accept", &["open"], "accepted", Some(RequestEventType::Accepted))
}

pub fn decline() -> ActionFactory {
    StatusTransition::factory("decline", &["open"], "declined", Some(RequestEventType::Declined))
}

pub fn cancel() -> ActionFactory {
    StatusTransition::factory(
        "cancel",
        &["draft", "open"],
        "cancelled",
        Some(RequestEventType::Cancelled),
    )
}

pub fn expire() -> ActionFactory {
    StatusTransition::factory("expire", &["open"], "expired", Some(RequestEventType::Expired))
}

/// The lifecycle every built-in type ships with.
pub fn default_actions() -> Vec<(&'static str, ActionFactory)> {
    vec![
        ("submit", submit()),
        ("accept", accept()),
        ("decline", decline()),
        ("cancel", cancel()),
        ("expire", expire()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(status: &str) -> Request {
        Request::new("1".into(), "reqflow.request", status)
    }

    #[test]
    fn transition_only_runs_from_declared_statuses() {
        let identity = Identity::anonymous();
        assert!(submit().build(request("draft")).can_execute(&identity));
        assert!(!submit().build(request("open")).can_execute(&identity));
        assert!(cancel().build(request("open")).can_execute(&identity));
        assert!(!accept().build(request("declined")).can_execute(&identity));
    }

    #[test]
    fn accept_moves_status_and_logs_event() {
        let identity = Identity::system();
        let mut action = accept().build(request("open"));
        let outcome = action.execute(&identity).unwrap();
        assert_eq!(outcome.event, Some(RequestEventType::Accepted));
        assert_eq!(action.into_request().status, "accepted");
    }

    #[test]
    fn submit_logs_nothing() {
        let mut action = submit().build(request("draft"));
        let outcome = action.execute(&Identity::system()).unwrap();
        assert!(outcome.event.is_none());
        assert_eq!(action.request().status, "open");
    }
}
