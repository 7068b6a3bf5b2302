//! Request dispatch
//!
//! Every validated request produces an answer built on a common skeleton:
//! the command, application and both correlation identifiers copied from the
//! request with the R-bit cleared, plus Session-Id (echoed from the request,
//! or synthesized when the client omitted one), Origin-Host, Origin-Realm
//! and Host-IP-Address from the configuration.
//!
//! Protocol-level failures never tear the connection down here: a request
//! missing required AVPs answers 5005, an unknown command answers 3001, and
//! in both cases the peer may carry on. Only a handler that marks the
//! session for closure (DPR) makes the read loop stop after the answer is
//! flushed.

use std::collections::HashMap;
use std::sync::Arc;

use crate::avp::{Avp, AvpData};
use crate::common::avp_code;
use crate::config::ServerConfig;
use crate::dictionary::Dictionary;
use crate::error::{DiameterError, ResultCode};
use crate::handlers;
use crate::message::{base_cmd, DiameterMessage};
use crate::session::{generate_session_id, Session};

/// Shared read-only state handed to command handlers
pub struct PeerContext<'a> {
    pub config: &'a ServerConfig,
    pub dict: &'a Dictionary,
}

/// A command handler: receives the request and a prebuilt answer skeleton,
/// returns the completed answer. Session state transitions happen here.
pub type CommandHandler =
    fn(&PeerContext<'_>, &mut Session, &DiameterMessage, DiameterMessage) -> DiameterMessage;

/// Result of dispatching one request
#[derive(Debug)]
pub struct DispatchOutcome {
    /// Answer to flush to the peer
    pub answer: DiameterMessage,
    /// Close the connection after the answer is written
    pub close: bool,
}

/// Maps command codes to handlers and runs the validation pipeline
pub struct Dispatcher {
    config: Arc<ServerConfig>,
    dict: Arc<Dictionary>,
    handlers: HashMap<u32, CommandHandler>,
}

impl Dispatcher {
    /// Create a dispatcher with the base protocol handlers registered
    pub fn new(config: Arc<ServerConfig>, dict: Arc<Dictionary>) -> Self {
        let mut dispatcher = Self {
            config,
            dict,
            handlers: HashMap::new(),
        };
        dispatcher.register(base_cmd::CAPABILITIES_EXCHANGE, handlers::handle_cer);
        dispatcher.register(base_cmd::DEVICE_WATCHDOG, handlers::handle_dwr);
        dispatcher.register(base_cmd::DISCONNECT_PEER, handlers::handle_dpr);
        dispatcher.register(handlers::USER_AUTH_COMMAND, handlers::handle_user_auth);
        dispatcher
    }

    /// Register (or replace) the handler for a command code
    pub fn register(&mut self, command_code: u32, handler: CommandHandler) {
        self.handlers.insert(command_code, handler);
    }

    /// Process one validated request and produce its answer
    pub fn dispatch(&self, session: &mut Session, msg: &DiameterMessage) -> DispatchOutcome {
        let mut answer = self.answer_skeleton(msg);

        match msg.validate_avps(&self.dict) {
            Err(e @ DiameterError::MissingAvp(_)) => {
                log::warn!(
                    "command {} rejected: {e}",
                    msg.header.command_code
                );
                push_result(&mut answer, ResultCode::MissingAvp, Some(&e.to_string()));
                return DispatchOutcome {
                    answer,
                    close: false,
                };
            }
            Err(e) => {
                log::warn!("cannot dispatch request: {e}");
                push_result(
                    &mut answer,
                    ResultCode::CommandUnsupported,
                    Some(&e.to_string()),
                );
                return DispatchOutcome {
                    answer,
                    close: false,
                };
            }
            Ok(()) => {}
        }

        let Some(handler) = self.handlers.get(&msg.header.command_code) else {
            log::warn!("no handler for command {}", msg.header.command_code);
            push_result(
                &mut answer,
                ResultCode::CommandUnsupported,
                Some(&format!("unhandled command {}", msg.header.command_code)),
            );
            return DispatchOutcome {
                answer,
                close: false,
            };
        };

        let ctx = PeerContext {
            config: &self.config,
            dict: &self.dict,
        };
        let answer = handler(&ctx, session, msg, answer);
        DispatchOutcome {
            answer,
            close: session.needs_close,
        }
    }

    fn answer_skeleton(&self, msg: &DiameterMessage) -> DiameterMessage {
        let mut answer = DiameterMessage::new_answer(msg);

        let session_avp = match msg.find_avp(avp_code::SESSION_ID) {
            Some(avp) => avp.clone(),
            None => Avp::mandatory(
                avp_code::SESSION_ID,
                AvpData::Utf8String(generate_session_id(&self.config.origin_host)),
            ),
        };
        answer.add_avp(session_avp);
        answer.add_avp(Avp::mandatory(
            avp_code::ORIGIN_HOST,
            AvpData::DiameterIdentity(self.config.origin_host.clone()),
        ));
        answer.add_avp(Avp::mandatory(
            avp_code::ORIGIN_REALM,
            AvpData::DiameterIdentity(self.config.origin_realm.clone()),
        ));
        answer.add_avp(Avp::mandatory(
            avp_code::HOST_IP_ADDRESS,
            AvpData::Address(self.config.host_ip()),
        ));
        answer
    }
}

/// Append a Result-Code AVP and, optionally, an Error-Message AVP
pub(crate) fn push_result(
    answer: &mut DiameterMessage,
    code: ResultCode,
    error_message: Option<&str>,
) {
    answer.add_avp(Avp::mandatory(
        avp_code::RESULT_CODE,
        AvpData::Unsigned32(code as u32),
    ));
    if let Some(text) = error_message {
        answer.add_avp(Avp::mandatory(
            avp_code::ERROR_MESSAGE,
            AvpData::Utf8String(text.to_string()),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            Arc::new(ServerConfig::test_fixture()),
            Arc::new(Dictionary::test_fixture()),
        )
    }

    fn dwr_with_identity() -> DiameterMessage {
        let mut msg = DiameterMessage::new_request(base_cmd::DEVICE_WATCHDOG, 0);
        msg.header.hop_by_hop_id = 11;
        msg.header.end_to_end_id = 22;
        msg.add_avp(Avp::mandatory(
            avp_code::ORIGIN_HOST,
            AvpData::DiameterIdentity("client.example.com".into()),
        ));
        msg.add_avp(Avp::mandatory(
            avp_code::ORIGIN_REALM,
            AvpData::DiameterIdentity("example.com".into()),
        ));
        msg
    }

    #[test]
    fn test_skeleton_copies_ids_and_config_identity() {
        let dispatcher = dispatcher();
        let mut session = Session::new("aaa.nasgate.example.com");
        let outcome = dispatcher.dispatch(&mut session, &dwr_with_identity());

        let answer = &outcome.answer;
        assert!(answer.header.is_answer());
        assert_eq!(answer.header.command_code, base_cmd::DEVICE_WATCHDOG);
        assert_eq!(answer.header.hop_by_hop_id, 11);
        assert_eq!(answer.header.end_to_end_id, 22);
        assert_eq!(answer.origin_host(), Some("aaa.nasgate.example.com"));
        assert_eq!(answer.origin_realm(), Some("nasgate.example.com"));
        assert!(answer.find_avp(avp_code::HOST_IP_ADDRESS).is_some());
    }

    #[test]
    fn test_session_id_synthesized_when_absent() {
        let dispatcher = dispatcher();
        let mut session = Session::new("aaa.nasgate.example.com");
        let outcome = dispatcher.dispatch(&mut session, &dwr_with_identity());
        let generated = outcome.answer.session_id().unwrap();
        assert!(generated.starts_with("aaa.nasgate.example.com;"));
    }

    #[test]
    fn test_session_id_echoed_when_present() {
        let dispatcher = dispatcher();
        let mut session = Session::new("aaa.nasgate.example.com");
        let mut msg = dwr_with_identity();
        msg.add_avp(Avp::mandatory(
            avp_code::SESSION_ID,
            AvpData::Utf8String("client;1;1".into()),
        ));
        let outcome = dispatcher.dispatch(&mut session, &msg);
        assert_eq!(outcome.answer.session_id(), Some("client;1;1"));
    }

    #[test]
    fn test_missing_avp_answers_5005_without_closing() {
        let dispatcher = dispatcher();
        let mut session = Session::new("aaa.nasgate.example.com");
        // DWR without Origin-Realm
        let mut msg = DiameterMessage::new_request(base_cmd::DEVICE_WATCHDOG, 0);
        msg.add_avp(Avp::mandatory(
            avp_code::ORIGIN_HOST,
            AvpData::DiameterIdentity("client.example.com".into()),
        ));

        let outcome = dispatcher.dispatch(&mut session, &msg);
        assert!(!outcome.close);
        assert_eq!(outcome.answer.result_code(), Some(5005));
        assert!(outcome.answer.error_message().unwrap().contains("296"));
    }

    #[test]
    fn test_unknown_command_answers_3001_without_closing() {
        let dispatcher = dispatcher();
        let mut session = Session::new("aaa.nasgate.example.com");
        let msg = DiameterMessage::new_request(999_999, 0);

        let outcome = dispatcher.dispatch(&mut session, &msg);
        assert!(!outcome.close);
        assert_eq!(outcome.answer.result_code(), Some(3001));
        assert!(outcome.answer.error_message().is_some());
    }

    #[test]
    fn test_known_command_without_handler_answers_3001() {
        let config = Arc::new(ServerConfig::test_fixture());
        let dict = Arc::new(Dictionary::test_fixture());
        let mut dispatcher = Dispatcher::new(config, dict);
        // Drop the watchdog handler while keeping the dictionary entry
        dispatcher.handlers.remove(&base_cmd::DEVICE_WATCHDOG);

        let mut session = Session::new("aaa.nasgate.example.com");
        let outcome = dispatcher.dispatch(&mut session, &dwr_with_identity());
        assert!(!outcome.close);
        assert_eq!(outcome.answer.result_code(), Some(3001));
    }
}
