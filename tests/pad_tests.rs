//! Pad linking, data flow and buffer sharing.

use padflow::buffer::Buffer;
use padflow::caps::Caps;
use padflow::element::pad::{PadLinkError, ProbeData, ProbeMask, ProbeReturn};
use padflow::element::{Element, ElementImpl, Pad, PadDirection, PadMode, PadTemplate, State};
use padflow::event::Event;
use padflow::flow::{FlowError, FlowSuccess};
use padflow::query::Query;
use parking_lot::Mutex;
use std::sync::Arc;

fn caps(s: &str) -> Caps {
    s.parse().unwrap()
}

fn pad(direction: PadDirection, caps: Caps) -> Pad {
    let template = match direction {
        PadDirection::Src => PadTemplate::src("src", caps),
        PadDirection::Sink => PadTemplate::sink("sink", caps),
    };
    Pad::from_template(&template, template.name_template.clone())
}

fn collecting(sink: &Pad) -> Arc<Mutex<Vec<Buffer>>> {
    let received = Arc::new(Mutex::new(Vec::new()));
    let store = received.clone();
    sink.set_chain_function(move |_, _, buffer| {
        store.lock().push(buffer);
        Ok(FlowSuccess::Ok)
    });
    received
}

#[test]
fn test_link_needs_common_caps() {
    let src = pad(PadDirection::Src, caps("audio/x-raw, rate=(int)44100"));
    let sink = pad(PadDirection::Sink, caps("audio/x-raw, rate=(int)48000"));
    assert_eq!(src.link(&sink), Err(PadLinkError::NoFormat));
    assert!(!src.is_linked());

    let sink = pad(PadDirection::Sink, caps("audio/x-raw, rate=(int)[ 8000, 96000 ]"));
    assert_eq!(src.link(&sink), Ok(()));
    assert_eq!(src.peer(), Some(sink.clone()));
    assert_eq!(sink.peer(), Some(src));
}

#[test]
fn test_link_with_any_always_succeeds() {
    for other in ["video/x-raw", "audio/x-raw, rate=(int)1", "EMPTY"] {
        let src = pad(PadDirection::Src, Caps::new_any());
        let sink = pad(PadDirection::Sink, caps(other));
        assert_eq!(src.link(&sink), Ok(()), "ANY ! {other}");

        let src = pad(PadDirection::Src, caps(other));
        let sink = pad(PadDirection::Sink, Caps::new_any());
        assert_eq!(src.link(&sink), Ok(()), "{other} ! ANY");
    }
}

#[test]
fn test_shared_buffer_is_copy_on_write() {
    let src_a = pad(PadDirection::Src, Caps::new_any());
    let src_b = pad(PadDirection::Src, Caps::new_any());
    let sink_a = pad(PadDirection::Sink, Caps::new_any());
    let sink_b = pad(PadDirection::Sink, Caps::new_any());
    src_a.link(&sink_a).unwrap();
    src_b.link(&sink_b).unwrap();

    let seen_b = collecting(&sink_b);
    sink_a.set_chain_function(|_, _, mut buffer| {
        buffer.make_mut()[0] = 0xff;
        assert_eq!(buffer.data(), &[0xff, 2, 3]);
        Ok(FlowSuccess::Ok)
    });
    for p in [&src_a, &src_b, &sink_a, &sink_b] {
        p.set_active(true);
    }

    let buffer = Buffer::from_vec(vec![1, 2, 3]);
    src_a.push(buffer.clone()).unwrap();
    src_b.push(buffer.clone()).unwrap();

    assert_eq!(buffer.data(), &[1, 2, 3]);
    assert_eq!(seen_b.lock()[0].data(), &[1, 2, 3]);
    assert!(seen_b.lock()[0].ptr_eq(&buffer));
}

#[test]
fn test_push_requires_activation() {
    let src = pad(PadDirection::Src, Caps::new_any());
    let sink = pad(PadDirection::Sink, Caps::new_any());
    src.link(&sink).unwrap();
    let received = collecting(&sink);

    assert_eq!(src.push(Buffer::with_size(1)), Err(FlowError::Flushing));
    src.set_active(true);
    assert_eq!(src.push(Buffer::with_size(1)), Err(FlowError::Flushing));
    sink.set_active(true);
    assert_eq!(src.push(Buffer::with_size(1)), Ok(FlowSuccess::Ok));
    assert_eq!(received.lock().len(), 1);

    src.unlink(&sink);
    assert_eq!(src.push(Buffer::with_size(1)), Err(FlowError::NotLinked));
}

#[test]
fn test_flush_cycle() {
    let src = pad(PadDirection::Src, Caps::new_any());
    let sink = pad(PadDirection::Sink, Caps::new_any());
    src.link(&sink).unwrap();
    collecting(&sink);
    src.set_active(true);
    sink.set_active(true);

    assert!(src.push_event(Event::Eos));
    assert!(sink.is_eos());
    assert_eq!(src.push(Buffer::with_size(1)), Err(FlowError::Eos));

    assert!(src.push_event(Event::FlushStart));
    assert!(sink.is_flushing());
    assert_eq!(src.push(Buffer::with_size(1)), Err(FlowError::Flushing));
    assert!(src.push_event(Event::flush_stop()));
    assert!(!sink.is_flushing());
    assert!(!sink.is_eos());
    assert_eq!(src.push(Buffer::with_size(1)), Ok(FlowSuccess::Ok));
}

#[test]
fn test_sticky_events_follow_relink() {
    let src = pad(PadDirection::Src, Caps::new_any());
    src.set_active(true);
    assert!(src.push_event(Event::stream_start("s")));
    assert!(src.push_event(Event::Caps(caps("audio/x-raw, rate=(int)8000"))));

    let sink = pad(PadDirection::Sink, caps("audio/x-raw"));
    collecting(&sink);
    sink.set_active(true);
    src.link(&sink).unwrap();
    assert!(sink.current_caps().is_none());
    src.push(Buffer::with_size(1)).unwrap();
    assert_eq!(sink.current_caps(), Some(caps("audio/x-raw, rate=(int)8000")));
    assert!(matches!(sink.sticky_events().first(), Some(Event::StreamStart(_))));
}

#[test]
fn test_negotiate_picks_downstream_preference() {
    let src = pad(PadDirection::Src, caps("video/x-raw, width=(int)[ 1, 1920 ], format=(string){ I420, RGB }"));
    let sink = pad(PadDirection::Sink, caps("video/x-raw, format=(string)RGB, width=(int)640"));
    src.link(&sink).unwrap();
    src.set_active(true);
    sink.set_active(true);

    assert!(src.negotiate());
    let negotiated = src.current_caps().unwrap();
    assert!(negotiated.is_fixed());
    let s = negotiated.structure(0).unwrap();
    assert_eq!(s.get_int("width"), Some(640));
    assert_eq!(s.get_str("format"), Some("RGB"));
    assert_eq!(sink.current_caps(), Some(negotiated));
}

#[test]
fn test_accept_caps_and_caps_query() {
    let sink = pad(PadDirection::Sink, caps("audio/x-raw, channels=(int)[ 1, 2 ]"));
    assert!(sink.query_accept_caps(&caps("audio/x-raw, channels=(int)2")));
    assert!(!sink.query_accept_caps(&caps("audio/x-raw, channels=(int)6")));

    let mut query = Query::new_caps(Some(caps("audio/x-raw, channels=(int)1")));
    assert!(sink.query(&mut query));
    assert_eq!(query.caps_result(), Some(&caps("audio/x-raw, channels=(int)1")));
}

#[test]
fn test_buffer_probe_counts_and_drops() {
    let src = pad(PadDirection::Src, Caps::new_any());
    let sink = pad(PadDirection::Sink, Caps::new_any());
    src.link(&sink).unwrap();
    let received = collecting(&sink);
    src.set_active(true);
    sink.set_active(true);

    let id = src.add_probe(ProbeMask::BUFFER, |_pad, data| match data {
        ProbeData::Buffer(b) if b.size() > 4 => ProbeReturn::Drop,
        _ => ProbeReturn::Ok,
    });
    src.push(Buffer::with_size(2)).unwrap();
    src.push(Buffer::with_size(8)).unwrap();
    assert_eq!(received.lock().len(), 1);

    assert!(src.remove_probe(id));
    src.push(Buffer::with_size(8)).unwrap();
    assert_eq!(received.lock().len(), 2);
}

struct Source;

impl ElementImpl for Source {
    fn constructed(&self, element: &Element) {
        let pad = Pad::from_template(&PadTemplate::src("src", Caps::new_any()), "src");
        pad.set_getrange_function(|_pad, _parent, offset, size| {
            if offset >= 10 {
                return Err(FlowError::Eos);
            }
            let end = (offset as usize + size).min(10);
            Ok(Buffer::from_vec((offset as usize..end).map(|n| n as u8).collect()))
        });
        pad.set_query_function(|pad, parent, query| match query {
            Query::Scheduling { pull_mode, .. } => {
                *pull_mode = true;
                true
            }
            _ => Pad::query_default(pad, parent, query),
        });
        element.add_pad(&pad).unwrap();
    }
}

#[test]
fn test_pull_mode_ranges() {
    let src = Element::new("source", Source);
    let sink = Pad::new("reader", PadDirection::Sink);
    src.static_pad("src").unwrap().link(&sink).unwrap();
    assert!(sink.activate_mode(PadMode::Pull, true));
    assert_eq!(src.static_pad("src").unwrap().mode(), PadMode::Pull);

    assert_eq!(sink.pull_range(0, 4).unwrap().data(), &[0, 1, 2, 3]);
    assert_eq!(sink.pull_range(8, 4), Err(FlowError::Eos));
    assert_eq!(sink.pull_range_partial(8, 4).unwrap().data(), &[8, 9]);
    assert_eq!(sink.pull_range_partial(10, 4), Err(FlowError::Eos));

    assert!(sink.set_active(false));
    assert_eq!(sink.pull_range(0, 1), Err(FlowError::Flushing));
    assert_eq!(src.current_state(), State::Null);
}
