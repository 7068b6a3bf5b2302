//! Base protocol command handlers
//!
//! Each handler completes the answer skeleton built by the dispatcher:
//! CER negotiates the common application set, DWR answers the liveness
//! probe, DPR acknowledges teardown and marks the session for closure, and
//! the sample authentication command checks credentials against the
//! configured user table.

use std::collections::HashSet;

use crate::avp::{Avp, AvpData};
use crate::common::avp_code;
use crate::dispatch::{push_result, PeerContext};
use crate::error::ResultCode;
use crate::message::DiameterMessage;
use crate::session::{Session, SessionState};

/// Sample application command exercising the authentication path
pub const USER_AUTH_COMMAND: u32 = 234567;

const NOT_ESTABLISHED: &str = "session not established, send CER first";
const BAD_CREDENTIALS: &str = "userID or passWD wrong";

/// Capabilities-Exchange-Request -> CEA
///
/// Logs the peer's advertised capabilities, intersects its offered
/// applications with the configured ones, and establishes the session when
/// at least one auth or acct application is shared.
pub fn handle_cer(
    ctx: &PeerContext<'_>,
    session: &mut Session,
    msg: &DiameterMessage,
    mut answer: DiameterMessage,
) -> DiameterMessage {
    let host = msg.origin_host().unwrap_or("<unknown>").to_string();
    let realm = msg.origin_realm().unwrap_or("<unknown>").to_string();
    log::info!("CER from host {host} in realm {realm}");

    if let Some(ip) = msg
        .find_avp(avp_code::HOST_IP_ADDRESS)
        .and_then(|a| a.as_address())
    {
        log::info!("peer {host} address: {ip}");
    }
    if let Some(vendor) = msg.find_avp(avp_code::VENDOR_ID).and_then(|a| a.as_u32()) {
        log::info!("peer {host} vendor: {}", ctx.dict.vendor_names(&[vendor])[0]);
    }
    if let Some(product) = msg
        .find_avp(avp_code::PRODUCT_NAME)
        .and_then(|a| a.as_utf8())
    {
        log::info!("peer {host} product: {product}");
    }
    if let Some(state_id) = msg
        .find_avp(avp_code::ORIGIN_STATE_ID)
        .and_then(|a| a.as_u32())
    {
        log::info!("peer {host} origin state: {state_id}");
    }

    let supported_vendors = all_u32(msg, avp_code::SUPPORTED_VENDOR_ID);
    if !supported_vendors.is_empty() {
        log::info!(
            "peer {host} supported vendors: {:?}",
            ctx.dict.vendor_names(&supported_vendors)
        );
    }

    let peer_auth_apps = all_u32(msg, avp_code::AUTH_APPLICATION_ID);
    let peer_acct_apps = all_u32(msg, avp_code::ACCT_APPLICATION_ID);
    log::info!(
        "peer {host} offers auth apps {:?}, acct apps {:?}",
        ctx.dict.auth_app_names(&peer_auth_apps),
        ctx.dict.acct_app_names(&peer_acct_apps)
    );

    let shared_auth = intersect(&peer_auth_apps, &ctx.config.auth_application_ids);
    let shared_acct = intersect(&peer_acct_apps, &ctx.config.acct_application_ids);

    answer.add_avp(Avp::mandatory(
        avp_code::VENDOR_ID,
        AvpData::Unsigned32(ctx.config.vendor_id),
    ));
    answer.add_avp(Avp::mandatory(
        avp_code::PRODUCT_NAME,
        AvpData::Utf8String(ctx.config.product_name.clone()),
    ));
    for app_id in &ctx.config.auth_application_ids {
        answer.add_avp(Avp::mandatory(
            avp_code::AUTH_APPLICATION_ID,
            AvpData::Unsigned32(*app_id),
        ));
    }
    for app_id in &ctx.config.acct_application_ids {
        answer.add_avp(Avp::mandatory(
            avp_code::ACCT_APPLICATION_ID,
            AvpData::Unsigned32(*app_id),
        ));
    }

    if !shared_auth.is_empty() || !shared_acct.is_empty() {
        session.state = SessionState::Established;
        push_result(&mut answer, ResultCode::Success, None);
        log::info!(
            "peer {host} accepted: common auth apps {:?}, acct apps {:?}",
            ctx.dict.auth_app_names(&shared_auth),
            ctx.dict.acct_app_names(&shared_acct)
        );
    } else {
        push_result(&mut answer, ResultCode::NoCommonApplication, None);
        log::warn!("peer {host} offers no common application, session stays down");
    }
    answer
}

/// Device-Watchdog-Request -> DWA
pub fn handle_dwr(
    ctx: &PeerContext<'_>,
    session: &mut Session,
    msg: &DiameterMessage,
    mut answer: DiameterMessage,
) -> DiameterMessage {
    let host = msg.origin_host().unwrap_or("<unknown>").to_string();
    log::debug!("DWR from {host}");

    answer.add_avp(Avp::mandatory(
        avp_code::VENDOR_ID,
        AvpData::Unsigned32(ctx.config.vendor_id),
    ));
    answer.add_avp(Avp::mandatory(
        avp_code::PRODUCT_NAME,
        AvpData::Utf8String(ctx.config.product_name.clone()),
    ));
    answer.add_avp(Avp::mandatory(
        avp_code::AUTH_APPLICATION_ID,
        AvpData::Unsigned32(msg.header.application_id),
    ));

    if !session.is_established() {
        log::warn!("DWR from {host} before capabilities exchange");
        push_result(&mut answer, ResultCode::UnableToDeliver, Some(NOT_ESTABLISHED));
    } else {
        push_result(&mut answer, ResultCode::Success, None);
    }
    answer
}

/// Disconnect-Peer-Request -> DPA
///
/// Acknowledges with success and marks the session so the read loop closes
/// the connection once the answer has been flushed.
pub fn handle_dpr(
    ctx: &PeerContext<'_>,
    session: &mut Session,
    msg: &DiameterMessage,
    mut answer: DiameterMessage,
) -> DiameterMessage {
    let host = msg.origin_host().unwrap_or("<unknown>").to_string();
    let cause = msg
        .find_avp(avp_code::DISCONNECT_CAUSE)
        .and_then(|a| a.as_u32());
    match cause {
        Some(id) => log::info!(
            "DPR from {host}, cause: {}",
            ctx.dict
                .cause_name(id)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Unknown({id})"))
        ),
        None => log::info!("DPR from {host}, no cause given"),
    }

    answer.add_avp(Avp::mandatory(
        avp_code::VENDOR_ID,
        AvpData::Unsigned32(ctx.config.vendor_id),
    ));
    answer.add_avp(Avp::mandatory(
        avp_code::PRODUCT_NAME,
        AvpData::Utf8String(ctx.config.product_name.clone()),
    ));
    answer.add_avp(Avp::mandatory(
        avp_code::AUTH_APPLICATION_ID,
        AvpData::Unsigned32(msg.header.application_id),
    ));
    push_result(&mut answer, ResultCode::Success, None);

    session.needs_close = true;
    session.state = SessionState::Closing;
    log::info!("peer {host} disconnecting");
    answer
}

/// Sample authentication request -> answer
///
/// Checks User-Name/User-Password against the configured credential map and
/// hands out the user's OAuth token in an EAP-Payload AVP on success.
pub fn handle_user_auth(
    ctx: &PeerContext<'_>,
    session: &mut Session,
    msg: &DiameterMessage,
    mut answer: DiameterMessage,
) -> DiameterMessage {
    let host = msg.origin_host().unwrap_or("<unknown>").to_string();
    log::info!("authentication request from {host}");

    if !session.is_established() {
        push_result(&mut answer, ResultCode::UnableToDeliver, Some(NOT_ESTABLISHED));
        return answer;
    }

    // Required-group validation already ran, but stay defensive about the
    // payload shapes the client chose.
    let (Some(user_avp), Some(pass_avp)) = (
        msg.find_avp(avp_code::USER_NAME),
        msg.find_avp(avp_code::USER_PASSWORD),
    ) else {
        push_result(
            &mut answer,
            ResultCode::MissingAvp,
            Some("User-Name and User-Password required"),
        );
        return answer;
    };

    let user_id = match user_avp.as_u32() {
        Some(id) if user_avp.data_len() >= 4 => id,
        _ => {
            log::warn!("peer {host} sent a malformed User-Name");
            push_result(
                &mut answer,
                ResultCode::AuthenticationRejected,
                Some(BAD_CREDENTIALS),
            );
            return answer;
        }
    };
    let password = pass_avp.as_utf8().unwrap_or("");
    log::info!("peer {host} authenticating user {user_id}");

    answer.add_avp(user_avp.clone());
    answer.add_avp(pass_avp.clone());

    match ctx.config.password_for(user_id) {
        Some(expected) if expected == password => {
            let token = ctx.config.oauth_token_for(user_id).unwrap_or("");
            push_result(&mut answer, ResultCode::Success, None);
            answer.add_avp(Avp::mandatory(
                avp_code::EAP_PAYLOAD,
                AvpData::Utf8String(token.to_string()),
            ));
            log::info!("peer {host} user {user_id} authenticated, token granted");
        }
        _ => {
            push_result(
                &mut answer,
                ResultCode::AuthenticationRejected,
                Some(BAD_CREDENTIALS),
            );
            log::warn!("peer {host} user {user_id} rejected");
        }
    }
    answer
}

fn all_u32(msg: &DiameterMessage, code: u32) -> Vec<u32> {
    msg.find_all_avps(code)
        .iter()
        .filter_map(|a| a.as_u32())
        .collect()
}

/// Intersection of the peer's offered ids with the locally configured ones,
/// deduplicated, in configuration order
fn intersect(offered: &[u32], configured: &[u32]) -> Vec<u32> {
    let offered: HashSet<u32> = offered.iter().copied().collect();
    let mut seen = HashSet::new();
    configured
        .iter()
        .copied()
        .filter(|id| offered.contains(id) && seen.insert(*id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::avp_code;
    use crate::config::ServerConfig;
    use crate::dictionary::Dictionary;
    use crate::dispatch::Dispatcher;
    use crate::message::base_cmd;
    use bytes::Bytes;
    use std::sync::Arc;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            Arc::new(ServerConfig::test_fixture()),
            Arc::new(Dictionary::test_fixture()),
        )
    }

    fn add_identity(msg: &mut DiameterMessage) {
        msg.add_avp(Avp::mandatory(
            avp_code::ORIGIN_HOST,
            AvpData::DiameterIdentity("client.example.com".into()),
        ));
        msg.add_avp(Avp::mandatory(
            avp_code::ORIGIN_REALM,
            AvpData::DiameterIdentity("example.com".into()),
        ));
    }

    fn cer_offering(auth_apps: &[u32]) -> DiameterMessage {
        let mut msg = DiameterMessage::new_request(base_cmd::CAPABILITIES_EXCHANGE, 0);
        add_identity(&mut msg);
        msg.add_avp(Avp::mandatory(
            avp_code::HOST_IP_ADDRESS,
            AvpData::Address("10.0.0.1".parse().unwrap()),
        ));
        msg.add_avp(Avp::mandatory(
            avp_code::VENDOR_ID,
            AvpData::Unsigned32(0),
        ));
        msg.add_avp(Avp::mandatory(
            avp_code::PRODUCT_NAME,
            AvpData::Utf8String("client".into()),
        ));
        for app in auth_apps {
            msg.add_avp(Avp::mandatory(
                avp_code::AUTH_APPLICATION_ID,
                AvpData::Unsigned32(*app),
            ));
        }
        msg
    }

    fn establish(dispatcher: &Dispatcher, session: &mut Session) {
        let outcome = dispatcher.dispatch(session, &cer_offering(&[16777251]));
        assert_eq!(outcome.answer.result_code(), Some(2001));
        assert!(session.is_established());
    }

    fn auth_request(user_id: u32, password: &str) -> DiameterMessage {
        let mut msg = DiameterMessage::new_request(USER_AUTH_COMMAND, 16777251);
        add_identity(&mut msg);
        msg.add_avp(Avp::mandatory(
            avp_code::USER_NAME,
            AvpData::Unsigned32(user_id),
        ));
        msg.add_avp(Avp::mandatory(
            avp_code::USER_PASSWORD,
            AvpData::Utf8String(password.into()),
        ));
        msg
    }

    #[test]
    fn test_cer_with_common_application_establishes() {
        let dispatcher = dispatcher();
        let mut session = Session::new("aaa.nasgate.example.com");
        let outcome = dispatcher.dispatch(&mut session, &cer_offering(&[16777251, 42]));

        assert!(!outcome.close);
        assert_eq!(outcome.answer.result_code(), Some(2001));
        assert_eq!(session.state, SessionState::Established);

        // CEA advertises the configured applications, not the peer's
        let auth_apps: Vec<u32> = outcome
            .answer
            .find_all_avps(avp_code::AUTH_APPLICATION_ID)
            .iter()
            .filter_map(|a| a.as_u32())
            .collect();
        assert_eq!(auth_apps, vec![16777251]);
        let acct_apps: Vec<u32> = outcome
            .answer
            .find_all_avps(avp_code::ACCT_APPLICATION_ID)
            .iter()
            .filter_map(|a| a.as_u32())
            .collect();
        assert_eq!(acct_apps, vec![3]);
        assert!(outcome.answer.find_avp(avp_code::VENDOR_ID).is_some());
        assert!(outcome.answer.find_avp(avp_code::PRODUCT_NAME).is_some());
    }

    #[test]
    fn test_cer_without_common_application_stays_new() {
        let dispatcher = dispatcher();
        let mut session = Session::new("aaa.nasgate.example.com");
        let outcome = dispatcher.dispatch(&mut session, &cer_offering(&[99999]));

        assert_eq!(outcome.answer.result_code(), Some(5010));
        assert_eq!(session.state, SessionState::New);
        assert!(!outcome.close);
    }

    #[test]
    fn test_dwr_before_cer_answers_unable_to_deliver() {
        let dispatcher = dispatcher();
        let mut session = Session::new("aaa.nasgate.example.com");
        let mut dwr = DiameterMessage::new_request(base_cmd::DEVICE_WATCHDOG, 0);
        add_identity(&mut dwr);

        let outcome = dispatcher.dispatch(&mut session, &dwr);
        assert!(!outcome.close);
        assert_eq!(outcome.answer.result_code(), Some(3002));
        assert_eq!(outcome.answer.error_message(), Some(NOT_ESTABLISHED));
        // Exactly one Result-Code, even on the failure branch
        assert_eq!(
            outcome.answer.find_all_avps(avp_code::RESULT_CODE).len(),
            1
        );
    }

    #[test]
    fn test_dwr_after_cer_answers_success() {
        let dispatcher = dispatcher();
        let mut session = Session::new("aaa.nasgate.example.com");
        establish(&dispatcher, &mut session);

        let mut dwr = DiameterMessage::new_request(base_cmd::DEVICE_WATCHDOG, 0);
        add_identity(&mut dwr);
        dwr.header.hop_by_hop_id = 123;
        dwr.header.end_to_end_id = 456;

        let outcome = dispatcher.dispatch(&mut session, &dwr);
        assert_eq!(outcome.answer.result_code(), Some(2001));
        assert_eq!(outcome.answer.header.hop_by_hop_id, 123);
        assert_eq!(outcome.answer.header.end_to_end_id, 456);
        assert_eq!(
            outcome.answer.find_all_avps(avp_code::RESULT_CODE).len(),
            1
        );
        assert_eq!(session.state, SessionState::Established);
    }

    #[test]
    fn test_dpr_marks_session_for_closure() {
        let dispatcher = dispatcher();
        let mut session = Session::new("aaa.nasgate.example.com");
        establish(&dispatcher, &mut session);

        let mut dpr = DiameterMessage::new_request(base_cmd::DISCONNECT_PEER, 0);
        add_identity(&mut dpr);
        dpr.add_avp(Avp::mandatory(
            avp_code::DISCONNECT_CAUSE,
            AvpData::Unsigned32(0), // REBOOTING
        ));

        let outcome = dispatcher.dispatch(&mut session, &dpr);
        assert!(outcome.close);
        assert_eq!(outcome.answer.result_code(), Some(2001));
        assert!(session.needs_close);
        assert_eq!(session.state, SessionState::Closing);
    }

    #[test]
    fn test_auth_before_cer_rejected() {
        let dispatcher = dispatcher();
        let mut session = Session::new("aaa.nasgate.example.com");
        let outcome = dispatcher.dispatch(&mut session, &auth_request(7, "secret"));
        assert_eq!(outcome.answer.result_code(), Some(3002));
        assert_eq!(outcome.answer.error_message(), Some(NOT_ESTABLISHED));
    }

    #[test]
    fn test_auth_success_grants_token() {
        let dispatcher = dispatcher();
        let mut session = Session::new("aaa.nasgate.example.com");
        establish(&dispatcher, &mut session);

        let outcome = dispatcher.dispatch(&mut session, &auth_request(7, "secret"));
        assert_eq!(outcome.answer.result_code(), Some(2001));
        assert_eq!(
            outcome
                .answer
                .find_avp(avp_code::EAP_PAYLOAD)
                .and_then(|a| a.as_utf8()),
            Some("tok-xyz")
        );
        // The credentials are echoed back
        assert!(outcome.answer.find_avp(avp_code::USER_NAME).is_some());
        assert!(outcome.answer.find_avp(avp_code::USER_PASSWORD).is_some());
        assert!(!outcome.close);
    }

    #[test]
    fn test_auth_wrong_password_rejected() {
        let dispatcher = dispatcher();
        let mut session = Session::new("aaa.nasgate.example.com");
        establish(&dispatcher, &mut session);

        let outcome = dispatcher.dispatch(&mut session, &auth_request(7, "wrong"));
        assert_eq!(outcome.answer.result_code(), Some(4001));
        assert_eq!(outcome.answer.error_message(), Some(BAD_CREDENTIALS));
        assert!(outcome.answer.find_avp(avp_code::EAP_PAYLOAD).is_none());
    }

    #[test]
    fn test_auth_unknown_user_rejected() {
        let dispatcher = dispatcher();
        let mut session = Session::new("aaa.nasgate.example.com");
        establish(&dispatcher, &mut session);

        let outcome = dispatcher.dispatch(&mut session, &auth_request(8, "secret"));
        assert_eq!(outcome.answer.result_code(), Some(4001));
    }

    #[test]
    fn test_auth_short_user_name_rejected() {
        let dispatcher = dispatcher();
        let mut session = Session::new("aaa.nasgate.example.com");
        establish(&dispatcher, &mut session);

        let mut msg = DiameterMessage::new_request(USER_AUTH_COMMAND, 16777251);
        add_identity(&mut msg);
        msg.add_avp(Avp::mandatory(
            avp_code::USER_NAME,
            AvpData::Raw(Bytes::new()), // zero-length payload
        ));
        msg.add_avp(Avp::mandatory(
            avp_code::USER_PASSWORD,
            AvpData::Utf8String("secret".into()),
        ));

        let outcome = dispatcher.dispatch(&mut session, &msg);
        assert_eq!(outcome.answer.result_code(), Some(4001));
        assert_eq!(outcome.answer.error_message(), Some(BAD_CREDENTIALS));
    }

    #[test]
    fn test_intersect_keeps_config_order_and_dedups() {
        assert_eq!(intersect(&[3, 1, 2, 2], &[2, 3, 9]), vec![2, 3]);
        assert!(intersect(&[1, 2], &[]).is_empty());
        assert!(intersect(&[], &[1, 2]).is_empty());
    }
}
