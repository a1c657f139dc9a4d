//! Line framing and JSON (de)serialization of protocol messages.
//!
//! [`FeedCodec`] is the `tokio-util` codec used on both socket halves: it
//! splits the inbound byte stream on `\n` (tolerating `\r\n`) and terminates
//! every outbound line with `\r\n`. [`encode`] / [`decode`] turn lines into
//! [`Message`]s and back.

use bytes::{BufMut, BytesMut};
use pf_core::error::DecodeError;
use pf_core::json_util::quote_bare_non_finite;
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::{KNOWN_OPS, Message};

/// Newline-delimited text codec.
///
/// Invalid UTF-8 is replaced lossily so a corrupt line surfaces as a
/// malformed message instead of killing the stream. Blank lines are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedCodec;

impl FeedCodec {
    pub fn new() -> Self {
        Self
    }
}

fn take_line(src: &mut BytesMut, end: usize) -> String {
    let raw = src.split_to(end);
    let mut line: &[u8] = &raw;
    while let Some((&last, rest)) = line.split_last() {
        if last == b'\n' || last == b'\r' {
            line = rest;
        } else {
            break;
        }
    }
    String::from_utf8_lossy(line).into_owned()
}

impl Decoder for FeedCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            let Some(pos) = src.iter().position(|b| *b == b'\n') else {
                return Ok(None);
            };
            let line = take_line(src, pos + 1);
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        // Trailing line without terminator.
        let len = src.len();
        let line = take_line(src, len);
        Ok((!line.trim().is_empty()).then_some(line))
    }
}

impl Encoder<String> for FeedCodec {
    type Error = std::io::Error;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// Serialize a message to one line (without terminator).
pub fn encode(msg: &Message) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

/// Parse one line into a message.
///
/// Bare `NaN` / `Infinity` tokens are quoted first. When the line does not
/// match any variant, the `op` field is inspected to tell an unsupported op
/// apart from a malformed message.
pub fn decode(line: &str) -> Result<Message, DecodeError> {
    let line = quote_bare_non_finite(line.trim());
    match serde_json::from_str::<Message>(&line) {
        Ok(msg) => Ok(msg),
        Err(e) => Err(classify(&line, e)),
    }
}

fn classify(line: &str, err: serde_json::Error) -> DecodeError {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
        return DecodeError::Malformed(err);
    };
    if !value.is_object() {
        return DecodeError::Malformed(err);
    }
    match value.get("op").and_then(|v| v.as_str()) {
        None => DecodeError::MissingOp,
        Some(op) if !KNOWN_OPS.contains(&op) => DecodeError::UnknownOp(op.to_string()),
        Some(_) => DecodeError::Malformed(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::*;
    use pf_core::types::{ChangeType, MarketStatus, Projected};

    #[test]
    fn framing_accepts_lf_and_crlf() {
        let mut codec = FeedCodec::new();
        let mut buf = BytesMut::from(&b"{\"a\":1}\r\n\n{\"b\":2}\n{\"c\""[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("{\"b\":2}"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b":3}");
        assert_eq!(codec.decode_eof(&mut buf).unwrap().as_deref(), Some("{\"c\":3}"));
        assert!(buf.is_empty());
    }

    #[test]
    fn framing_is_lossy_on_bad_utf8() {
        let mut codec = FeedCodec::new();
        let mut buf = BytesMut::from(&b"{\"op\":\xff}\n"[..]);
        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert!(line.contains('\u{FFFD}'));
        assert!(matches!(decode(&line), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn encoder_terminates_with_crlf() {
        let mut codec = FeedCodec::new();
        let mut dst = BytesMut::new();
        codec.encode("{\"op\":\"heartbeat\",\"id\":3}".to_string(), &mut dst).unwrap();
        assert_eq!(&dst[..], b"{\"op\":\"heartbeat\",\"id\":3}\r\n");
    }

    #[test]
    fn encodes_requests() {
        let auth = Message::Authentication(AuthenticationMessage {
            id: 1,
            app_key: "k".into(),
            session: "s".into(),
        });
        let v: serde_json::Value = serde_json::from_str(&encode(&auth).unwrap()).unwrap();
        assert_eq!(v, serde_json::json!({"op":"authentication","id":1,"appKey":"k","session":"s"}));

        let sub = Message::MarketSubscription(MarketSubscriptionMessage {
            id: 2,
            clk: None,
            initial_clk: None,
            segmentation_enabled: None,
            conflate_ms: Some(500),
            heartbeat_ms: None,
            market_filter: MarketFilter {
                market_ids: vec!["1.23".into()],
                ..Default::default()
            },
            market_data_filter: MarketDataFilter {
                ladder_levels: Some(3),
                fields: vec![MarketDataField::ExBestOffersDisp, MarketDataField::SpProjected],
            },
        });
        let v: serde_json::Value = serde_json::from_str(&encode(&sub).unwrap()).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "op": "marketSubscription", "id": 2, "conflateMs": 500,
                "marketFilter": {"marketIds": ["1.23"]},
                "marketDataFilter": {"ladderLevels": 3, "fields": ["EX_BEST_OFFERS_DISP", "SP_PROJECTED"]}
            })
        );

        let orders = Message::OrderSubscription(OrderSubscriptionMessage {
            id: 3,
            clk: None,
            initial_clk: None,
            segmentation_enabled: None,
            conflate_ms: None,
            heartbeat_ms: None,
            order_filter: Some(OrderFilter {
                include_overall_position: Some(false),
                ..Default::default()
            }),
        });
        let v: serde_json::Value = serde_json::from_str(&encode(&orders).unwrap()).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"op":"orderSubscription","id":3,"orderFilter":{"includeOverallPosition":false}})
        );
    }

    #[test]
    fn decodes_push_messages() {
        let conn = decode(r#"{"op":"connection","connectionId":"002-051134157842-432409"}"#).unwrap();
        assert_eq!(
            conn,
            Message::Connection(ConnectionMessage {
                connection_id: "002-051134157842-432409".into()
            })
        );
        assert_eq!(conn.id(), None);

        let status = decode(
            r#"{"op":"status","id":1,"statusCode":"SUCCESS","connectionClosed":false,"connectionsAvailable":9}"#,
        )
        .unwrap();
        let Message::Status(s) = &status else { panic!("expected status") };
        assert!(s.is_success());
        assert_eq!(s.connections_available, Some(9));
        assert_eq!(status.id(), Some(1));

        let mcm = decode(
            r#"{"op":"mcm","id":2,"clk":"AAAAAAAA","initialClk":"G1h3","pt":1760000000000,"ct":"SUB_IMAGE",
                "mc":[{"id":"1.23","img":true,"tv":1520.5,
                       "marketDefinition":{"status":"OPEN","inPlay":false,"version":7,"runners":[{"id":101,"status":"ACTIVE"}]},
                       "rc":[{"id":101,"batb":[[0,2.5,100]],"trd":[[2.5,40]],"ltp":2.5,"tv":40,"spn":NaN,"spf":3.1}]}]}"#,
        )
        .unwrap();
        let Message::Mcm(m) = mcm else { panic!("expected mcm") };
        assert_eq!(m.ct, Some(ChangeType::SubImage));
        assert_eq!(m.initial_clk.as_deref(), Some("G1h3"));
        let mc = &m.mc[0];
        assert!(mc.img);
        assert_eq!(mc.market_definition.as_ref().map(|d| d.status), Some(MarketStatus::Open));
        let rc = &mc.rc[0];
        assert_eq!(rc.spn, Some(Projected::Unavailable));
        assert_eq!(rc.spf, Some(Projected::Price(3.1)));
        assert_eq!(rc.batb[0].price(), 2.5);

        let hb = decode(r#"{"op":"mcm","id":2,"clk":"AAAAAAAB","pt":1760000005000,"ct":"HEARTBEAT"}"#).unwrap();
        let Message::Mcm(m) = hb else { panic!("expected mcm") };
        assert_eq!(m.ct, Some(ChangeType::Heartbeat));
        assert!(m.mc.is_empty());

        let ocm = decode(r#"{"op":"ocm","id":3,"clk":"x","pt":1,"oc":[{"id":"1.23","orc":[{"id":101,"mb":[[2.5,4]]}]}]}"#).unwrap();
        let Message::Ocm(o) = ocm else { panic!("expected ocm") };
        assert_eq!(o.oc[0].orc[0].id, 101);
    }

    #[test]
    fn decode_errors_are_classified() {
        assert!(matches!(decode("{not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode("[1,2]"), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode(r#"{"id":1}"#), Err(DecodeError::MissingOp)));
        match decode(r#"{"op":"keepAlive","id":1}"#) {
            Err(DecodeError::UnknownOp(op)) => assert_eq!(op, "keepAlive"),
            other => panic!("unexpected {other:?}"),
        }
        // Known op, wrong shape.
        assert!(matches!(decode(r#"{"op":"status","id":1}"#), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn every_variant_decodes_back_to_itself() {
        let pushed = [
            r#"{"op":"connection","connectionId":"002-051134157842-432409"}"#,
            r#"{"op":"status","id":4,"statusCode":"FAILURE","errorCode":"INVALID_SESSION_INFORMATION",
                "errorMessage":"session expired","connectionClosed":true}"#,
            r#"{"op":"mcm","id":2,"clk":"AAAAAAAA","pt":1760000000000,"ct":"SUB_IMAGE","segmentType":"SEG_START",
                "mc":[{"id":"1.23","img":true,"tv":1520.5,
                       "marketDefinition":{"status":"OPEN","inPlay":false,"version":7,"venue":"Ascot",
                                           "runners":[{"id":101,"hc":-0.5,"status":"ACTIVE","sortPriority":1}]},
                       "rc":[{"id":101,"hc":-0.5,"batb":[[0,2.5,100]],"atl":[[2.6,12]],"trd":[[2.5,40]],
                              "ltp":2.5,"tv":40,"spn":NaN,"spf":3.1}]}]}"#,
            r#"{"op":"ocm","id":3,"clk":"x","pt":1,"oc":[{"id":"1.23","fullImage":true,
                "orc":[{"id":101,"uo":[{"id":"77","p":2.5,"s":4,"side":"B","status":"E","pt":"L","ot":"L",
                        "pd":1760000000000,"sm":1,"sr":3}],"mb":[[2.5,1]]}]}]}"#,
        ];
        let mut messages = vec![
            Message::Authentication(AuthenticationMessage {
                id: 1,
                app_key: "k".into(),
                session: "s".into(),
            }),
            Message::MarketSubscription(MarketSubscriptionMessage {
                id: 2,
                clk: Some("AAAB".into()),
                initial_clk: Some("G1h3".into()),
                segmentation_enabled: Some(true),
                conflate_ms: Some(500),
                heartbeat_ms: Some(5_000),
                market_filter: MarketFilter {
                    market_ids: vec!["1.23".into()],
                    ..Default::default()
                },
                market_data_filter: MarketDataFilter {
                    ladder_levels: Some(3),
                    fields: vec![MarketDataField::ExBestOffersDisp, MarketDataField::SpProjected],
                },
            }),
            Message::OrderSubscription(OrderSubscriptionMessage {
                id: 3,
                clk: None,
                initial_clk: None,
                segmentation_enabled: Some(true),
                conflate_ms: None,
                heartbeat_ms: None,
                order_filter: Some(OrderFilter {
                    include_overall_position: Some(false),
                    ..Default::default()
                }),
            }),
            Message::Heartbeat(HeartbeatMessage { id: 9 }),
        ];
        messages.extend(pushed.iter().map(|line| decode(line).unwrap()));

        let ops: Vec<&str> = messages.iter().map(Message::op).collect();
        assert_eq!(ops, KNOWN_OPS.to_vec());
        for msg in &messages {
            let line = encode(msg).unwrap();
            assert_eq!(&decode(&line).unwrap(), msg, "{line}");
        }

        let Message::Mcm(m) = &messages[6] else { panic!("expected mcm") };
        assert_eq!(m.segment_type, Some(SegmentType::SegStart));
        assert_eq!(m.mc[0].rc[0].spn, Some(Projected::Unavailable));
    }
}
