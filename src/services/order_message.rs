//! Fulfillment message rendering.
//!
//! The text is a pure function of the persisted order plus the `now` passed in,
//! which only feeds the trailing `Sent:` line. Messages longer than the
//! configured limit are shortened in fixed steps: permalinks go first, then
//! trailing item lines, then notes, then a hard cut.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use url::form_urlencoded::byte_serialize;
use utoipa::ToSchema;

use crate::config::MessagingConfig;
use crate::entities::order_item;
use crate::services::money;
use crate::services::orders::OrderWithItems;

const ELLIPSIS: &str = "...";

/// Who the message is addressed to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageFlow {
    /// Sent by the shopper; item lines carry product permalinks
    #[default]
    Customer,
    /// Sent by staff for a manual order; no permalinks
    Admin,
}

#[derive(Debug, Clone)]
pub struct MessageOptions {
    pub provider_base_url: String,
    pub channel_id: String,
    pub store_base_url: Option<String>,
    pub currency_symbol: String,
    pub max_chars: usize,
}

impl From<&MessagingConfig> for MessageOptions {
    fn from(cfg: &MessagingConfig) -> Self {
        Self {
            provider_base_url: cfg.provider_base_url.clone(),
            channel_id: cfg.channel_id.clone(),
            store_base_url: cfg.store_base_url.clone(),
            currency_symbol: cfg.currency_symbol.clone(),
            max_chars: cfg.max_message_chars,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RenderedMessage {
    pub text: String,
    /// Click-to-chat URL with `text` percent-encoded
    pub deep_link: String,
    /// Whether the length limit forced any shortening
    pub truncated: bool,
}

/// `<base>/<channel>?text=<message>`, spaces encoded as `%20`.
pub fn build_deep_link(provider_base_url: &str, channel_id: &str, text: &str) -> String {
    let encoded: String = byte_serialize(text.as_bytes()).collect();
    format!(
        "{}/{}?text={}",
        provider_base_url.trim_end_matches('/'),
        channel_id,
        encoded.replace('+', "%20")
    )
}

struct ItemLine {
    text: String,
    permalink: Option<String>,
}

struct Sections {
    head: Vec<String>,
    items: Vec<ItemLine>,
    totals: Vec<String>,
    notes: Option<String>,
    footer: String,
}

impl Sections {
    fn compose(&self, links: bool, kept_items: usize, notes: Option<&str>) -> String {
        let mut lines: Vec<String> = self.head.clone();

        lines.push(String::new());
        lines.push("*Items*".to_string());
        for item in self.items.iter().take(kept_items) {
            lines.push(item.text.clone());
            if links {
                if let Some(link) = &item.permalink {
                    lines.push(format!("  {}", link));
                }
            }
        }
        let hidden = self.items.len().saturating_sub(kept_items);
        if hidden > 0 {
            let noun = if hidden == 1 { "item" } else { "items" };
            lines.push(format!("...and {} more {}", hidden, noun));
        }

        lines.push(String::new());
        lines.extend(self.totals.iter().cloned());

        if let Some(notes) = notes {
            lines.push(String::new());
            lines.push("*Notes*".to_string());
            lines.push(notes.to_string());
        }

        lines.push(String::new());
        lines.push(self.footer.clone());
        lines.join("\n")
    }

    fn fit(&self, max_chars: usize) -> (String, bool) {
        let all = self.items.len();
        let notes = self.notes.as_deref();

        let full = self.compose(true, all, notes);
        if char_len(&full) <= max_chars {
            return (full, false);
        }

        let mut kept = all;
        loop {
            let candidate = self.compose(false, kept, notes);
            if char_len(&candidate) <= max_chars {
                return (candidate, true);
            }
            if kept <= 1 {
                break;
            }
            kept -= 1;
        }

        if let Some(notes) = notes {
            let without_notes = char_len(&self.compose(false, kept, Some("")));
            let room = max_chars.saturating_sub(without_notes + ELLIPSIS.len());
            if room > 0 {
                let cut = format!("{}{}", take_chars(notes, room), ELLIPSIS);
                return (self.compose(false, kept, Some(&cut)), true);
            }
        }

        let bare = self.compose(false, kept, None);
        if char_len(&bare) <= max_chars {
            return (bare, true);
        }
        let room = max_chars.saturating_sub(ELLIPSIS.len());
        (format!("{}{}", take_chars(&bare, room), ELLIPSIS), true)
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn take_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn price(symbol: &str, amount: Decimal) -> String {
    format!("{}{}", symbol, money(amount))
}

fn item_text(item: &order_item::Model, symbol: &str) -> String {
    let attrs: Vec<String> = [
        item.size.as_deref().map(|s| format!("Size: {}", s)),
        item.color.as_deref().map(|c| format!("Color: {}", c)),
    ]
    .into_iter()
    .flatten()
    .collect();

    let name = if attrs.is_empty() {
        item.product_name.clone()
    } else {
        format!("{} ({})", item.product_name, attrs.join(", "))
    };

    format!(
        "- {} x {} @ {} = {}",
        item.quantity,
        name,
        price(symbol, item.unit_price),
        price(symbol, item.line_total)
    )
}

fn permalink(store_base_url: Option<&str>, slug: Option<&str>) -> Option<String> {
    Some(format!(
        "{}/products/{}",
        store_base_url?.trim_end_matches('/'),
        slug?
    ))
}

/// Renders the message and its deep link for `order`.
pub fn render_order_message(
    order: &OrderWithItems,
    flow: MessageFlow,
    options: &MessageOptions,
    now: DateTime<Utc>,
) -> RenderedMessage {
    let o = &order.order;
    let symbol = options.currency_symbol.as_str();

    let mut head = vec![
        format!("*Order {}*", o.order_number),
        format!("Date: {}", o.created_at.format("%Y-%m-%d %H:%M UTC")),
        String::new(),
        "*Customer*".to_string(),
        format!("Name: {}", o.customer_name),
        format!("Email: {}", o.customer_email),
        format!("Phone: {}", o.customer_phone),
        format!("Address: {}", o.address),
        format!("City: {}", o.city),
    ];
    if let Some(postal_code) = &o.postal_code {
        head.push(format!("Postal code: {}", postal_code));
    }

    let items = order
        .items
        .iter()
        .map(|item| ItemLine {
            text: item_text(item, symbol),
            permalink: match flow {
                MessageFlow::Customer => permalink(
                    options.store_base_url.as_deref(),
                    item.product_slug.as_deref(),
                ),
                MessageFlow::Admin => None,
            },
        })
        .collect();

    let sections = Sections {
        head,
        items,
        totals: vec![
            format!("Subtotal: {}", price(symbol, o.subtotal)),
            format!("Shipping: {}", price(symbol, o.shipping)),
            format!("*Total: {}*", price(symbol, o.total)),
        ],
        notes: o.notes.clone(),
        footer: format!("Sent: {}", now.format("%Y-%m-%d %H:%M UTC")),
    };

    let (text, truncated) = sections.fit(options.max_chars);
    let deep_link = build_deep_link(&options.provider_base_url, &options.channel_id, &text);

    RenderedMessage {
        text,
        deep_link,
        truncated,
    }
}
