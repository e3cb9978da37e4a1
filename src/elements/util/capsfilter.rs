//! Restricts the formats negotiated across a link.

use crate::caps::Caps;
use crate::element::{Element, ElementImpl, Pad, PadTemplate};
use crate::elements::property_caps;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::flow::FlowError;
use crate::pipeline::parser::PropertyValue;
use crate::query::Query;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Passes buffers through unchanged and only lets formats within its
/// `caps` property through negotiation.
///
/// Caps queries on either pad answer the peer's caps intersected with the
/// filter; a caps event outside the filter is refused.
///
/// ```rust
/// use padflow::caps::Caps;
/// use padflow::element::Element;
/// use padflow::elements::CapsFilter;
///
/// let caps: Caps = "video/x-raw, width=(int)320".parse().unwrap();
/// let filter = Element::new("filter", CapsFilter::new(caps.clone()));
/// assert!(filter.imp::<CapsFilter>().unwrap().caps().is_equal(&caps));
/// ```
pub struct CapsFilter {
    caps: Arc<Mutex<Caps>>,
}

impl Default for CapsFilter {
    fn default() -> Self {
        Self::new(Caps::new_any())
    }
}

impl CapsFilter {
    /// Filter on `caps`.
    pub fn new(caps: Caps) -> Self {
        Self {
            caps: Arc::new(Mutex::new(caps)),
        }
    }

    /// The current filter.
    pub fn caps(&self) -> Caps {
        self.caps.lock().clone()
    }
}

fn filtered_query(filter: &Mutex<Caps>, pad: &Pad, parent: Option<&Element>, query: &mut Query) -> bool {
    if !Pad::query_default(pad, parent, query) {
        return false;
    }
    if let Query::Caps {
        result: Some(result),
        ..
    } = query
    {
        *result = result.intersect(&filter.lock());
    }
    true
}

impl ElementImpl for CapsFilter {
    fn constructed(&self, element: &Element) {
        let sink = Pad::from_template(&PadTemplate::sink("sink", Caps::new_any()), "sink");
        let src = Pad::from_template(&PadTemplate::src("src", Caps::new_any()), "src");
        for pad in [&sink, &src] {
            pad.set_proxy_caps(true);
            let filter = self.caps.clone();
            pad.set_query_function(move |pad, parent, query| filtered_query(&filter, pad, parent, query));
        }

        let filter = self.caps.clone();
        sink.set_event_function(move |pad, parent, event| {
            if let Event::Caps(caps) = &event {
                let allowed = filter.lock().clone();
                if !caps.is_subset(&allowed) {
                    debug!(pad = %pad.debug_name(), %caps, %allowed, "caps outside filter");
                    return false;
                }
            }
            Pad::event_default(pad, parent, event)
        });
        sink.set_chain_function(|_pad, parent, buffer| {
            parent
                .and_then(|p| p.static_pad("src"))
                .ok_or(FlowError::NotLinked)?
                .push(buffer)
        });

        for pad in [sink, src] {
            if let Err(e) = element.add_pad(&pad) {
                debug!(element = %element.name(), error = %e, "cannot add pad");
            }
        }
    }

    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![
            PadTemplate::sink("sink", Caps::new_any()),
            PadTemplate::src("src", Caps::new_any()),
        ]
    }

    fn set_property(&self, element: &Element, name: &str, value: &PropertyValue) -> Result<()> {
        match name {
            "caps" => {
                let caps = property_caps(element, name, value)?;
                debug!(element = %element.name(), %caps, "filter changed");
                *self.caps.lock() = caps;
                if let Some(sink) = element.static_pad("sink")
                    && sink.is_linked()
                {
                    sink.push_event(Event::Reconfigure);
                }
                Ok(())
            }
            _ => Err(Error::invalid_property(element.name(), name, "no such property")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use crate::element::{PadDirection, State};
    use crate::flow::FlowSuccess;

    fn caps(s: &str) -> Caps {
        s.parse().unwrap()
    }

    #[test]
    fn test_query_intersects_filter() {
        let filter = Element::new("filter", CapsFilter::new(caps("audio/x-raw, rate=(int)[ 8000, 48000 ]")));
        let upstream = Pad::new("up", PadDirection::Src);
        upstream.link(&filter.static_pad("sink").unwrap()).unwrap();

        let answer = upstream.peer_query_caps(None);
        assert!(answer.is_equal(&caps("audio/x-raw, rate=(int)[ 8000, 48000 ]")));

        let answer = upstream.peer_query_caps(Some(&caps("audio/x-raw, rate=(int)96000")));
        assert!(answer.is_empty());
        assert!(!filter
            .static_pad("sink")
            .unwrap()
            .query_accept_caps(&caps("video/x-raw")));
    }

    #[test]
    fn test_negotiation_through_filter() {
        let filter = Element::new("filter", CapsFilter::default());
        filter.set_property("caps", "audio/x-raw, channels=(int){ 2, 1 }").unwrap();
        let upstream = Pad::from_template(
            &PadTemplate::src("src", caps("audio/x-raw, channels=(int)[ 1, 8 ]")),
            "src",
        );
        let downstream = Pad::new("down", PadDirection::Sink);
        let received = Arc::new(Mutex::new(0));
        let count = received.clone();
        downstream.set_chain_function(move |_, _, _| {
            *count.lock() += 1;
            Ok(FlowSuccess::Ok)
        });
        upstream.set_active(true);
        downstream.set_active(true);
        upstream.link(&filter.static_pad("sink").unwrap()).unwrap();
        filter.static_pad("src").unwrap().link(&downstream).unwrap();
        filter.set_state(State::Paused).unwrap();

        assert!(upstream.negotiate());
        let negotiated = downstream.current_caps().unwrap();
        assert_eq!(negotiated.structure(0).unwrap().get_int("channels"), Some(2));
        upstream.push(Buffer::with_size(4)).unwrap();
        assert_eq!(*received.lock(), 1);

        assert!(!upstream.push_event(Event::Caps(caps("audio/x-raw, channels=(int)6"))));
    }

    #[test]
    fn test_invalid_caps_property() {
        let filter = Element::new("filter", CapsFilter::default());
        assert!(matches!(
            filter.set_property("caps", "video/x-raw, width=(int)[ 1"),
            Err(Error::InvalidProperty { .. })
        ));
        assert!(filter.imp::<CapsFilter>().unwrap().caps().is_any());
    }
}
