use crate::models::status::OrderStatus;

/// Substrings marking a status as "in progress, more specific than shipped".
const IN_PROGRESS_MARKERS: &[&str] = &["transit", "pickup", "sorting", "hub", "assign", "pick"];
const CANCEL_MARKERS: &[&str] = &["cancel", "return", "fail"];

/// Maps a vendor's free-form status onto an order status.
///
/// Pure and deterministic so replayed webhooks land on the same result. When
/// nothing matches, an order that is already shipped, in transit or terminal
/// keeps its status instead of regressing to `processing`.
pub fn normalize(raw: &str, current: Option<&OrderStatus>) -> OrderStatus {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return current.cloned().unwrap_or(OrderStatus::Processing);
    }

    let lower = trimmed.to_lowercase();
    match lower.as_str() {
        "pending" => return OrderStatus::Processing,
        "delivered" => return OrderStatus::Delivered,
        "returned" | "cancelled" => return OrderStatus::Cancelled,
        _ => {}
    }

    if lower == "in_transit"
        || lower == "picked"
        || IN_PROGRESS_MARKERS.iter().any(|marker| lower.contains(marker))
    {
        return OrderStatus::Label(format_label(trimmed));
    }

    if lower.contains("deliver") {
        return OrderStatus::Delivered;
    }
    if CANCEL_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return OrderStatus::Cancelled;
    }
    if lower.contains("ship") {
        return OrderStatus::Shipped;
    }

    match current {
        Some(current) if current.is_terminal() || current.is_in_transit() => current.clone(),
        _ => OrderStatus::Processing,
    }
}

/// `in_transit` -> `In Transit`, `PICKED-UP` -> `Picked Up`.
pub fn format_label(raw: &str) -> String {
    raw.split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(text: &str) -> OrderStatus {
        OrderStatus::Label(text.to_string())
    }

    #[test]
    fn in_transit_becomes_a_formatted_label() {
        assert_eq!(
            normalize("in_transit", Some(&OrderStatus::Processing)),
            label("In Transit")
        );
    }

    #[test]
    fn delivered_matches_regardless_of_case() {
        for current in [
            None,
            Some(OrderStatus::Pending),
            Some(OrderStatus::Processing),
            Some(OrderStatus::Shipped),
            Some(label("In Transit")),
            Some(OrderStatus::Delivered),
        ] {
            assert_eq!(normalize("DELIVERED", current.as_ref()), OrderStatus::Delivered);
        }
    }

    #[test]
    fn empty_status_keeps_current() {
        assert_eq!(
            normalize("", Some(&OrderStatus::Shipped)),
            OrderStatus::Shipped
        );
        assert_eq!(normalize("   ", None), OrderStatus::Processing);
    }

    #[test]
    fn exact_vendor_terms() {
        assert_eq!(normalize("pending", None), OrderStatus::Processing);
        assert_eq!(normalize("returned", None), OrderStatus::Cancelled);
        assert_eq!(normalize("Cancelled", None), OrderStatus::Cancelled);
    }

    #[test]
    fn in_progress_markers_win_over_substring_fallbacks() {
        assert_eq!(normalize("picked", None), label("Picked"));
        assert_eq!(normalize("pickup_requested", None), label("Pickup Requested"));
        assert_eq!(normalize("at_sorting_hub", None), label("At Sorting Hub"));
        assert_eq!(normalize("rider-assigned", None), label("Rider Assigned"));
        assert_eq!(normalize("pickup_failed", None), label("Pickup Failed"));
    }

    #[test]
    fn substring_fallbacks() {
        assert_eq!(
            normalize("delivered_approval_pending", None),
            OrderStatus::Delivered
        );
        assert_eq!(normalize("partial_delivered", None), OrderStatus::Delivered);
        assert_eq!(normalize("cancelled_approval_pending", None), OrderStatus::Cancelled);
        assert_eq!(normalize("return_in_progress", None), OrderStatus::Cancelled);
        assert_eq!(normalize("Shipped", None), OrderStatus::Shipped);
    }

    #[test]
    fn unmapped_status_never_downgrades_advanced_orders() {
        for current in [
            OrderStatus::Shipped,
            label("In Transit"),
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(normalize("in_review", Some(&current)), current);
            assert_eq!(normalize("hold", Some(&current)), current);
        }

        assert_eq!(
            normalize("in_review", Some(&OrderStatus::Pending)),
            OrderStatus::Processing
        );
        assert_eq!(normalize("unknown", None), OrderStatus::Processing);
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let raws = ["in_transit", "DELIVERED", "", "hold", "Sorting", "returned", "weird!"];
        let currents = [
            None,
            Some(OrderStatus::Shipped),
            Some(OrderStatus::Cancelled),
            Some(label("Picked")),
        ];

        for raw in raws {
            for current in &currents {
                assert_eq!(
                    normalize(raw, current.as_ref()),
                    normalize(raw, current.as_ref())
                );
            }
        }
    }

    #[test]
    fn label_formatting() {
        assert_eq!(format_label("in_transit"), "In Transit");
        assert_eq!(format_label("PICKED-UP"), "Picked Up");
        assert_eq!(format_label("  at  hub "), "At Hub");
    }
}
