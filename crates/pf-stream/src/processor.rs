//! Turns `mcm` / `ocm` messages into [`FeedEvent`](pf_core::types::FeedEvent) payloads.
//!
//! The processor keeps, per market, the latest market definition and a
//! [`RunnerBook`] per runner. Definitions are the source of truth for runner
//! activity: price changes are forwarded only for runners whose cached status
//! is `ACTIVE`. With no definition ever seen, a runner is treated as active
//! and the ambiguity is logged once per market.
//!
//! A full image clears the market's ladders before applying. A delta for a
//! never-seen market is applied to empty state and reported as a delta.
//! Closed markets are evicted after their final event.
//!
//! Segmented images (`SEG_START` .. `SEG_END`) are buffered and applied as
//! one message once the last segment arrives.

use std::sync::Arc;
use std::time::Instant;

use ahash::AHashMap;
use pf_core::types::{
    ChangeType, MarketChangeEvent, MarketDefinition, OrderChangeEvent, RunnerStatus, RunnerUpdate,
};
use tracing::{debug, info, warn};

use crate::ladder::RunnerBook;
use crate::protocol::{
    MarketChange, MarketChangeMessage, OrderChangeMessage, RunnerChange, SegmentType,
};

/// Runner identity within a market: selection id plus handicap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RunnerKey {
    id: u64,
    hc_bits: u64,
}

impl RunnerKey {
    fn new(id: u64, hc: Option<f64>) -> Self {
        // `+ 0.0` folds -0.0 into 0.0.
        Self {
            id,
            hc_bits: (hc.unwrap_or(0.0) + 0.0).to_bits(),
        }
    }
}

#[derive(Default)]
struct MarketState {
    definition: Option<Arc<MarketDefinition>>,
    runners: AHashMap<RunnerKey, RunnerBook>,
    warned_no_definition: bool,
}

/// Change-token state of one stream (market or order).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClockState {
    pub clk: Option<String>,
    pub initial_clk: Option<String>,
}

impl ClockState {
    fn update(&mut self, clk: &Option<String>, initial_clk: &Option<String>) {
        if clk.is_some() {
            self.clk.clone_from(clk);
        }
        if initial_clk.is_some() {
            self.initial_clk.clone_from(initial_clk);
        }
    }
}

pub struct ChangeProcessor {
    label: String,
    markets: AHashMap<String, MarketState>,
    market_clock: ClockState,
    order_clock: ClockState,
    last_heartbeat: Option<Instant>,
    /// Segments of an image still being received.
    segments: Option<MarketChangeMessage>,
}

impl ChangeProcessor {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            markets: AHashMap::new(),
            market_clock: ClockState::default(),
            order_clock: ClockState::default(),
            last_heartbeat: None,
            segments: None,
        }
    }

    /// Apply one `mcm`, returning one event per market change it carried.
    pub fn process_market_change(&mut self, msg: MarketChangeMessage) -> Vec<MarketChangeEvent> {
        self.market_clock.update(&msg.clk, &msg.initial_clk);

        if msg.status == Some(503) {
            warn!("[{}] feed reports stream latency (status 503)", self.label);
        }
        if msg.ct == Some(ChangeType::Heartbeat) {
            self.last_heartbeat = Some(Instant::now());
            return Vec::new();
        }
        let Some(msg) = self.assemble(msg) else {
            return Vec::new();
        };

        let mut events = Vec::with_capacity(msg.mc.len());
        for mc in msg.mc {
            let event = self.apply_market(mc, &msg.clk, msg.pt, msg.ct);
            if event.is_closed() {
                info!("[{}] market {} closed, evicting", self.label, event.market_id);
                self.markets.remove(&event.market_id);
            }
            events.push(event);
        }
        events
    }

    /// Buffer segments until `SEG_END`; unsegmented messages pass through.
    fn assemble(&mut self, msg: MarketChangeMessage) -> Option<MarketChangeMessage> {
        match msg.segment_type {
            None => Some(msg),
            Some(SegmentType::SegStart) => {
                if let Some(partial) = self.segments.replace(msg) {
                    warn!(
                        "[{}] new segmented image before the previous ended, dropping {} market(s)",
                        self.label,
                        partial.mc.len()
                    );
                }
                None
            }
            Some(kind) => {
                let Some(mut acc) = self.segments.take() else {
                    warn!("[{}] segment without a start, applying it alone", self.label);
                    return Some(msg);
                };
                acc.mc.extend(msg.mc);
                if msg.clk.is_some() {
                    acc.clk = msg.clk;
                }
                acc.pt = msg.pt;
                if kind == SegmentType::SegEnd {
                    acc.segment_type = None;
                    debug!("[{}] segmented image complete ({} markets)", self.label, acc.mc.len());
                    Some(acc)
                } else {
                    self.segments = Some(acc);
                    None
                }
            }
        }
    }

    fn apply_market(
        &mut self,
        mc: MarketChange,
        clk: &Option<String>,
        publish_time: u64,
        change_type: Option<ChangeType>,
    ) -> MarketChangeEvent {
        let label = &self.label;
        let seen = self.markets.contains_key(&mc.id);
        let state = self.markets.entry(mc.id.clone()).or_default();

        if mc.img {
            state.runners.clear();
        } else if !seen {
            debug!("[{label}] delta for unseen market {}, applying to empty state", mc.id);
        }

        let definition_changed = mc.market_definition.is_some();
        if let Some(def) = mc.market_definition {
            if let Some(old) = &state.definition {
                if old.status != def.status {
                    info!(
                        "[{label}] market {} {} -> {}",
                        mc.id,
                        old.status.as_str(),
                        def.status.as_str()
                    );
                }
            }
            state.definition = Some(Arc::new(def));
        }

        if state.definition.is_none() && !mc.rc.is_empty() && !state.warned_no_definition {
            warn!(
                "[{label}] market {} has prices but no definition yet, treating runners as active",
                mc.id
            );
            state.warned_no_definition = true;
        }

        let mut runners = Vec::with_capacity(mc.rc.len());
        for rc in &mc.rc {
            let book = state.runners.entry(RunnerKey::new(rc.id, rc.hc)).or_default();
            book.apply(rc);

            let status = match &state.definition {
                Some(def) => def.runner_status(rc.id, rc.hc),
                None => Some(RunnerStatus::Active),
            };
            match status {
                Some(status) if status.is_active() => runners.push(runner_update(rc, status, book)),
                Some(status) => {
                    debug!("[{label}] {} runner {} is {}, skipped", mc.id, rc.id, status.as_str());
                }
                None => debug!("[{label}] {} runner {} not on roster, skipped", mc.id, rc.id),
            }
        }

        MarketChangeEvent {
            market_id: mc.id,
            clk: clk.clone(),
            publish_time,
            change_type,
            full_image: mc.img,
            definition: state.definition.clone(),
            definition_changed,
            runners,
            total_matched: mc.tv,
            conflated: mc.con,
        }
    }

    /// Forward one `ocm`. Heartbeats only advance the clock.
    pub fn process_order_change(&mut self, msg: OrderChangeMessage) -> Option<OrderChangeEvent> {
        self.order_clock.update(&msg.clk, &msg.initial_clk);
        if msg.ct == Some(ChangeType::Heartbeat) {
            self.last_heartbeat = Some(Instant::now());
            return None;
        }
        Some(OrderChangeEvent {
            clk: msg.clk,
            publish_time: msg.pt,
            change_type: msg.ct,
            markets: msg.oc,
        })
    }

    pub fn market_clock(&self) -> &ClockState {
        &self.market_clock
    }

    pub fn order_clock(&self) -> &ClockState {
        &self.order_clock
    }

    /// When the last change-message heartbeat arrived.
    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.last_heartbeat
    }

    pub fn definition(&self, market_id: &str) -> Option<Arc<MarketDefinition>> {
        self.markets.get(market_id).and_then(|m| m.definition.clone())
    }

    /// Number of markets with cached state.
    pub fn market_count(&self) -> usize {
        self.markets.len()
    }

    /// Drop a market's cached state (e.g. after unsubscribing).
    pub fn forget(&mut self, market_id: &str) -> bool {
        self.markets.remove(market_id).is_some()
    }
}

fn runner_update(rc: &RunnerChange, status: RunnerStatus, book: &RunnerBook) -> RunnerUpdate {
    RunnerUpdate {
        selection_id: rc.id,
        handicap: rc.hc,
        status,
        back: book.back(),
        lay: book.lay(),
        traded: book.traded(),
        last_traded: book.ltp,
        traded_volume: book.tv,
        sp_near: book.spn.and_then(|p| p.value()),
        sp_far: book.spf.and_then(|p| p.value()),
    }
}

#[cfg(test)]
mod tests {
    use pf_core::types::PriceSize;

    use super::*;
    use crate::codec;
    use crate::protocol::Message;

    fn mcm(line: &str) -> MarketChangeMessage {
        match codec::decode(line).unwrap() {
            Message::Mcm(m) => m,
            other => panic!("expected mcm, got {other:?}"),
        }
    }

    const IMAGE: &str = r#"{"op":"mcm","id":2,"clk":"c1","initialClk":"i1","pt":1000,"ct":"SUB_IMAGE","mc":[{"id":"1.23","img":true,
        "marketDefinition":{"status":"OPEN","version":7,"inPlay":false,"runners":[
            {"id":101,"status":"ACTIVE"},{"id":102,"status":"ACTIVE"},{"id":103,"status":"REMOVED"}]},
        "rc":[{"id":101,"bdatb":[[0,2.5,100]],"bdatl":[[0,2.56,30]],"ltp":2.5,"spn":NaN},
              {"id":102,"bdatb":[[0,4.1,12]]},
              {"id":103,"bdatb":[[0,50,1]]}]}]}"#;

    #[test]
    fn image_emits_active_runners_only() {
        let mut p = ChangeProcessor::new("test");
        let events = p.process_market_change(mcm(IMAGE));
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert!(e.full_image);
        assert!(e.definition_changed);
        assert_eq!(e.change_type, Some(ChangeType::SubImage));
        assert_eq!(e.clk.as_deref(), Some("c1"));
        let ids: Vec<u64> = e.runners.iter().map(|r| r.selection_id).collect();
        assert_eq!(ids, vec![101, 102]);
        assert_eq!(e.runners[0].back, vec![PriceSize(2.5, 100.0)]);
        assert_eq!(e.runners[0].sp_near, None);
        assert_eq!(p.market_clock().initial_clk.as_deref(), Some("i1"));
    }

    #[test]
    fn delta_updates_cached_book() {
        let mut p = ChangeProcessor::new("test");
        p.process_market_change(mcm(IMAGE));
        let events = p.process_market_change(mcm(
            r#"{"op":"mcm","id":2,"clk":"c2","pt":2000,"mc":[{"id":"1.23","rc":[{"id":101,"bdatb":[[0,2.52,80]],"spn":3.4}]}]}"#,
        ));
        let e = &events[0];
        assert!(!e.full_image);
        assert!(!e.definition_changed);
        assert_eq!(e.definition.as_ref().map(|d| d.version), Some(7));
        let r = &e.runners[0];
        assert_eq!(r.back, vec![PriceSize(2.52, 80.0)]);
        assert_eq!(r.lay, vec![PriceSize(2.56, 30.0)]);
        assert_eq!(r.last_traded, Some(2.5));
        assert_eq!(r.sp_near, Some(3.4));
    }

    #[test]
    fn new_image_clears_ladders() {
        let mut p = ChangeProcessor::new("test");
        p.process_market_change(mcm(IMAGE));
        let events = p.process_market_change(mcm(
            r#"{"op":"mcm","id":2,"pt":3000,"ct":"SUB_IMAGE","mc":[{"id":"1.23","img":true,"rc":[{"id":102,"bdatl":[[0,4.3,5]]}]}]}"#,
        ));
        let r = &events[0].runners[0];
        assert_eq!(r.selection_id, 102);
        assert!(r.back.is_empty());
        assert_eq!(r.lay, vec![PriceSize(4.3, 5.0)]);
        // Definition survives an image that does not resend it.
        assert!(events[0].definition.is_some());
    }

    #[test]
    fn unseen_market_delta_is_not_promoted_and_runners_assumed_active() {
        let mut p = ChangeProcessor::new("test");
        let events = p.process_market_change(mcm(
            r#"{"op":"mcm","id":2,"pt":1,"mc":[{"id":"1.99","rc":[{"id":5,"atb":[[3.0,10]]}]}]}"#,
        ));
        let e = &events[0];
        assert!(!e.full_image);
        assert!(e.definition.is_none());
        assert_eq!(e.runners.len(), 1);
        assert_eq!(e.runners[0].status, RunnerStatus::Active);
        assert_eq!(e.runners[0].back, vec![PriceSize(3.0, 10.0)]);
    }

    #[test]
    fn runner_turning_inactive_stops_forwarding() {
        let mut p = ChangeProcessor::new("test");
        p.process_market_change(mcm(IMAGE));
        let events = p.process_market_change(mcm(
            r#"{"op":"mcm","pt":5,"mc":[{"id":"1.23","marketDefinition":{"status":"SUSPENDED","version":8,"runners":[
                {"id":101,"status":"ACTIVE"},{"id":102,"status":"REMOVED"}]},
                "rc":[{"id":101,"ltp":2.6},{"id":102,"ltp":4.0}]}]}"#,
        ));
        let ids: Vec<u64> = events[0].runners.iter().map(|r| r.selection_id).collect();
        assert_eq!(ids, vec![101]);
        assert!(events[0].definition_changed);
    }

    #[test]
    fn runner_missing_from_roster_is_skipped() {
        let mut p = ChangeProcessor::new("test");
        p.process_market_change(mcm(IMAGE));
        let events = p.process_market_change(mcm(
            r#"{"op":"mcm","pt":6,"mc":[{"id":"1.23","rc":[{"id":555,"atb":[[3.0,10]]},{"id":102,"atb":[[4.2,7]]}]}]}"#,
        ));
        let ids: Vec<u64> = events[0].runners.iter().map(|r| r.selection_id).collect();
        assert_eq!(ids, vec![102]);
    }

    #[test]
    fn segmented_image_applied_on_last_segment() {
        let mut p = ChangeProcessor::new("test");
        let start = p.process_market_change(mcm(
            r#"{"op":"mcm","id":2,"clk":"s1","pt":1,"ct":"SUB_IMAGE","segmentType":"SEG_START","mc":[{"id":"1.1","img":true,
                "marketDefinition":{"status":"OPEN","version":1,"runners":[{"id":1,"status":"ACTIVE"}]},"rc":[{"id":1,"atb":[[2.0,5]]}]}]}"#,
        ));
        let middle = p.process_market_change(mcm(
            r#"{"op":"mcm","id":2,"clk":"s2","pt":2,"segmentType":"SEG","mc":[{"id":"1.2","img":true}]}"#,
        ));
        assert!(start.is_empty());
        assert!(middle.is_empty());
        assert_eq!(p.market_count(), 0);

        let end = p.process_market_change(mcm(
            r#"{"op":"mcm","id":2,"clk":"s3","pt":3,"segmentType":"SEG_END","mc":[{"id":"1.3","img":true}]}"#,
        ));
        let ids: Vec<&str> = end.iter().map(|e| e.market_id.as_str()).collect();
        assert_eq!(ids, vec!["1.1", "1.2", "1.3"]);
        assert!(end.iter().all(|e| e.full_image && e.change_type == Some(ChangeType::SubImage)));
        assert_eq!(end[0].clk.as_deref(), Some("s3"));
        assert_eq!(end[0].runners[0].back, vec![PriceSize(2.0, 5.0)]);
        assert_eq!(p.market_clock().clk.as_deref(), Some("s3"));
    }

    #[test]
    fn segment_without_start_is_applied() {
        let mut p = ChangeProcessor::new("test");
        let events = p.process_market_change(mcm(
            r#"{"op":"mcm","id":2,"pt":3,"segmentType":"SEG_END","mc":[{"id":"1.3","img":true}]}"#,
        ));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn heartbeat_only_moves_clock() {
        let mut p = ChangeProcessor::new("test");
        p.process_market_change(mcm(IMAGE));
        let events =
            p.process_market_change(mcm(r#"{"op":"mcm","id":2,"clk":"c9","pt":9,"ct":"HEARTBEAT"}"#));
        assert!(events.is_empty());
        assert_eq!(p.market_clock().clk.as_deref(), Some("c9"));
        assert!(p.last_heartbeat().is_some());
        assert_eq!(p.market_count(), 1);
    }

    #[test]
    fn closed_market_emits_final_event_then_evicts() {
        let mut p = ChangeProcessor::new("test");
        p.process_market_change(mcm(IMAGE));
        let events = p.process_market_change(mcm(
            r#"{"op":"mcm","pt":10,"mc":[{"id":"1.23","marketDefinition":{"status":"CLOSED","version":9,"runners":[
                {"id":101,"status":"WINNER"},{"id":102,"status":"LOSER"}]}}]}"#,
        ));
        assert_eq!(events.len(), 1);
        assert!(events[0].is_closed());
        assert_eq!(p.market_count(), 0);
        assert!(p.definition("1.23").is_none());
    }

    #[test]
    fn order_changes_forwarded_as_is() {
        let mut p = ChangeProcessor::new("test");
        let Message::Ocm(msg) = codec::decode(
            r#"{"op":"ocm","id":3,"clk":"o1","pt":7,"ct":"SUB_IMAGE","oc":[{"id":"1.23","fullImage":true,"orc":[{"id":101,"mb":[[2.5,4]]}]}]}"#,
        )
        .unwrap() else {
            panic!("expected ocm")
        };
        let e = p.process_order_change(msg).unwrap();
        assert_eq!(e.change_type, Some(ChangeType::SubImage));
        assert!(e.markets[0].full_image);
        assert_eq!(p.order_clock().clk.as_deref(), Some("o1"));

        let Message::Ocm(hb) =
            codec::decode(r#"{"op":"ocm","id":3,"clk":"o2","pt":8,"ct":"HEARTBEAT"}"#).unwrap()
        else {
            panic!("expected ocm")
        };
        assert!(p.process_order_change(hb).is_none());
        assert_eq!(p.order_clock().clk.as_deref(), Some("o2"));
    }
}
