//! Paginated listing scan of received gifts.

use snipe_session::{Dispatcher, GiftObservation, ObservedDetail, SessionEventHandler};
use snipe_wire::{MessageSender, Object, ReceivedGift, Request, SentGift};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Page size of received-gift listings
pub const PAGE_SIZE: i32 = 100;

/// Scans received gifts and reports each one
#[derive(Debug, Clone)]
pub struct GiftScanner {
    dispatcher: Arc<Dispatcher>,
    events: Arc<dyn SessionEventHandler>,
}

impl GiftScanner {
    /// Create a scanner
    pub fn new(dispatcher: Arc<Dispatcher>, events: Arc<dyn SessionEventHandler>) -> Self {
        Self { dispatcher, events }
    }

    /// Scan every gift held by `owner_id`, returning how many were observed
    ///
    /// Errors are logged and end the scan early.
    pub async fn scan(&self, owner_id: i64) -> usize {
        let mut offset = String::new();
        let mut observed = 0usize;
        loop {
            let request = Request::GetReceivedGifts {
                business_connection_id: String::new(),
                owner_id: MessageSender::from_owner_id(owner_id),
                offset: offset.clone(),
                limit: PAGE_SIZE,
            };
            let page = match self.dispatcher.call(request).await {
                Ok(Object::ReceivedGifts(page)) => page,
                Ok(Object::Error(e)) => {
                    warn!("Gift listing for {} failed: {}", owner_id, e);
                    break;
                }
                Ok(other) => {
                    warn!("Unexpected gift listing reply: {}", other.kind());
                    break;
                }
                Err(e) => {
                    error!("Gift listing for {} not completed: {}", owner_id, e);
                    break;
                }
            };

            debug!("Gift page for {} with {} items", owner_id, page.gifts.len());
            for gift in &page.gifts {
                self.events.notify_gift_observed(&observation(owner_id, gift));
                observed += 1;
            }
            if page.next_offset.is_empty() {
                break;
            }
            offset = page.next_offset;
        }
        info!("Scanned {} gifts of {}", observed, owner_id);
        observed
    }

    /// Scan the gifts of the logged-in user
    pub async fn scan_self(&self) -> usize {
        match self.dispatcher.call(Request::GetMe).await {
            Ok(Object::User(me)) => self.scan(me.id).await,
            Ok(Object::Error(e)) => {
                warn!("Could not resolve current user: {}", e);
                0
            }
            Ok(other) => {
                warn!("Unexpected getMe reply: {}", other.kind());
                0
            }
            Err(e) => {
                error!("Could not resolve current user: {}", e);
                0
            }
        }
    }
}

fn observation(owner_id: i64, gift: &ReceivedGift) -> GiftObservation {
    let detail = match &gift.gift {
        Some(SentGift::SentGiftUpgraded { gift }) => {
            let name = |attribute: &Option<snipe_wire::GiftAttribute>| {
                attribute.as_ref().map(|a| a.name.clone()).unwrap_or_default()
            };
            ObservedDetail::Upgraded {
                model: name(&gift.model),
                backdrop: name(&gift.backdrop),
                symbol: name(&gift.symbol),
            }
        }
        Some(SentGift::SentGiftRegular { gift }) => ObservedDetail::Regular {
            upgrade_price: (gift.upgrade_star_count > 0).then_some(gift.upgrade_star_count),
        },
        None => ObservedDetail::Regular { upgrade_price: None },
    };
    GiftObservation {
        owner_id,
        received_gift_id: gift.received_gift_id.clone(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snipe_session::{MemoryTransport, Transport};
    use snipe_wire::{Frame, Gift, GiftAttribute, ReceivedGifts, UpgradedGift, User};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Recorder(Mutex<Vec<GiftObservation>>);

    impl SessionEventHandler for Recorder {
        fn notify_authorized(&self) {}
        fn notify_gift_observed(&self, observation: &GiftObservation) {
            self.0.lock().unwrap().push(observation.clone());
        }
        fn notify_limited_gift(&self, _gift: &Gift) {}
    }

    fn regular(id: &str, upgrade: i64) -> ReceivedGift {
        ReceivedGift {
            received_gift_id: id.into(),
            can_be_upgraded: upgrade > 0,
            gift: Some(SentGift::SentGiftRegular {
                gift: Gift {
                    upgrade_star_count: upgrade,
                    ..Gift::default()
                },
            }),
        }
    }

    fn upgraded(id: &str) -> ReceivedGift {
        let attribute = |name: &str| Some(GiftAttribute { name: name.into() });
        ReceivedGift {
            received_gift_id: id.into(),
            can_be_upgraded: false,
            gift: Some(SentGift::SentGiftUpgraded {
                gift: UpgradedGift {
                    model: attribute("Brick"),
                    backdrop: attribute("Onyx"),
                    symbol: attribute("Star"),
                    ..UpgradedGift::default()
                },
            }),
        }
    }

    /// Answer listing requests from a script of pages, in order
    fn serve(transport: Arc<MemoryTransport>, dispatcher: Arc<Dispatcher>, replies: Vec<Object>) {
        let replies = Mutex::new(replies.into_iter());
        let d = dispatcher;
        transport.set_send_hook(move |sent| {
            if let Some(reply) = replies.lock().unwrap().next() {
                let frame = Frame::new(sent.id, reply);
                let d = d.clone();
                // Deliver after send returns, as the driver thread would
                std::thread::spawn(move || {
                    d.on_frame(frame);
                });
            }
        });
    }

    #[tokio::test]
    async fn test_scan_follows_pages() {
        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = Arc::new(Dispatcher::new(transport.clone()));
        dispatcher.attach(transport.create_session().unwrap());
        let recorder = Arc::new(Recorder::default());

        serve(
            transport.clone(),
            dispatcher.clone(),
            vec![
                Object::User(User { id: 42, first_name: "me".into() }),
                Object::ReceivedGifts(ReceivedGifts {
                    gifts: vec![regular("1", 25000), upgraded("2")],
                    next_offset: "p2".into(),
                }),
                Object::ReceivedGifts(ReceivedGifts {
                    gifts: vec![regular("3", 0)],
                    next_offset: String::new(),
                }),
            ],
        );

        let scanner = GiftScanner::new(dispatcher.clone(), recorder.clone());
        assert_eq!(scanner.scan_self().await, 3);

        let offsets: Vec<_> = transport
            .sent()
            .into_iter()
            .filter_map(|s| match s.request {
                Request::GetReceivedGifts { offset, limit, owner_id, .. } => {
                    assert_eq!(limit, PAGE_SIZE);
                    assert_eq!(owner_id, MessageSender::MessageSenderUser { user_id: 42 });
                    Some(offset)
                }
                _ => None,
            })
            .collect();
        assert_eq!(offsets, vec![String::new(), "p2".to_string()]);

        let observed = recorder.0.lock().unwrap().clone();
        assert_eq!(observed[0].detail, ObservedDetail::Regular { upgrade_price: Some(25000) });
        assert_eq!(
            observed[1].detail,
            ObservedDetail::Upgraded {
                model: "Brick".into(),
                backdrop: "Onyx".into(),
                symbol: "Star".into(),
            }
        );
        assert_eq!(observed[2].detail, ObservedDetail::Regular { upgrade_price: None });
    }

    #[tokio::test]
    async fn test_error_ends_scan() {
        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = Arc::new(Dispatcher::new(transport.clone()));
        dispatcher.attach(transport.create_session().unwrap());
        let recorder = Arc::new(Recorder::default());
        serve(
            transport.clone(),
            dispatcher.clone(),
            vec![Object::Error(snipe_wire::RemoteError::new(400, "BOT_METHOD_INVALID"))],
        );

        let scanner = GiftScanner::new(dispatcher, recorder.clone());
        assert_eq!(scanner.scan(-1001).await, 0);
        assert!(recorder.0.lock().unwrap().is_empty());
    }
}
