//! Property tests for descriptor parsing
//!
//! Any parameter set rendered back to a descriptor must parse to the same
//! parameters, whatever mix of positional and keyword parts it uses.

use instrument_link::descriptor::{parse, parse_any, Interface, ParamValue, Params};
use proptest::prelude::*;
use std::net::Ipv6Addr;

fn device_path() -> impl Strategy<Value = String> {
    prop_oneof![
        "/dev/tty(USB|ACM|S)[0-9]{1,2}",
        "COM[1-9][0-9]?",
        "/dev/serial/by-id/usb-[A-Za-z0-9_=-]{4,16}",
        "/dev/serial/by-path/pci-0000:00:14\\.[0-9]-usb-0:[0-9](=[a-z]{1,4})?",
    ]
}

/// Free-form text, including the descriptor delimiters
fn text() -> impl Strategy<Value = String> {
    "[A-Za-z0-9 ,._:=\\[\\]-]{0,16}"
}

/// Render `params` and parse the result back
fn reparse(interface: Interface, params: &Params) -> Params {
    let text = params.to_descriptor(interface);
    parse(interface, &text, None).unwrap_or_else(|e| panic!("{} did not parse: {}", text, e))
}

fn host() -> impl Strategy<Value = String> {
    prop_oneof![
        any::<[u8; 4]>().prop_map(|o| format!("{}.{}.{}.{}", o[0], o[1], o[2], o[3])),
        any::<[u16; 8]>().prop_map(|s| Ipv6Addr::from(s).to_string()),
        "[a-z][a-z0-9-]{0,10}[a-z0-9](\\.[a-z]{2,6}){0,2}",
    ]
}

proptest! {
    #[test]
    fn serial_descriptor_round_trip(
        device in device_path(),
        baud in prop::option::of(prop::sample::select(vec![300i64, 9600, 19200, 115200, 921600])),
        bytesize in prop::option::of(5i64..=8),
        parity in prop::option::of(prop::sample::select(vec!["N", "E", "O"])),
        stopbits in prop::option::of(prop::sample::select(vec![1.0f64, 1.5, 2.0])),
        rtscts in prop::option::of(any::<bool>()),
    ) {
        let mut values: Vec<(&str, ParamValue)> = vec![("device", device.into())];
        if let Some(v) = baud { values.push(("baudrate", v.into())); }
        if let Some(v) = bytesize { values.push(("bytesize", v.into())); }
        if let Some(v) = parity { values.push(("parity", v.into())); }
        if let Some(v) = stopbits { values.push(("stopbits", v.into())); }
        if let Some(v) = rtscts { values.push(("rtscts", v.into())); }

        let params = Params::build(Interface::Serial, values).unwrap();
        let text = params.to_descriptor(Interface::Serial);
        let reparsed = parse(Interface::Serial, &text, None).unwrap();
        prop_assert_eq!(&reparsed, &params, "descriptor was {}", text);
    }

    #[test]
    fn tcp_descriptor_round_trip(
        host in host(),
        port in 1i64..=65535,
        connect_timeout in prop::option::of(0.001f64..600.0),
    ) {
        let mut values: Vec<(&str, ParamValue)> = vec![("host", host.into()), ("port", port.into())];
        if let Some(t) = connect_timeout {
            values.push(("connect_timeout", t.into()));
        }

        let params = Params::build(Interface::Tcp, values).unwrap();
        let text = params.to_descriptor(Interface::Tcp);
        let (interface, reparsed) = parse_any(&text, None).unwrap();
        prop_assert_eq!(interface, Interface::Tcp);
        prop_assert_eq!(&reparsed, &params, "descriptor was {}", text);
    }

    #[test]
    fn usbtmc_descriptor_round_trip(
        vendor in prop::option::of(0i64..=0xffff),
        product in prop::option::of(0i64..=0xffff),
        serial in "[A-Za-z0-9_.=-]{1,16}",
    ) {
        let mut values: Vec<(&str, ParamValue)> = vec![("serialnr", serial.into())];
        if let Some(v) = vendor { values.push(("vendorid", v.into())); }
        if let Some(p) = product { values.push(("productid", p.into())); }

        let params = Params::build(Interface::Usbtmc, values).unwrap();
        prop_assert_eq!(reparse(Interface::Usbtmc, &params), params);
    }

    #[test]
    fn vxi11_descriptor_round_trip(
        host in host(),
        name in prop::option::of("[a-z0-9,]{1,10}"),
    ) {
        let mut values: Vec<(&str, ParamValue)> = vec![("host", host.into())];
        if let Some(n) = name { values.push(("name", n.into())); }

        let params = Params::build(Interface::Vxi11, values).unwrap();
        prop_assert_eq!(reparse(Interface::Vxi11, &params), params);
    }

    #[test]
    fn accepted_strings_always_round_trip(device in text(), serial in text(), name in text()) {
        let cases = [
            (Interface::Serial, "device", device),
            (Interface::Usbtmc, "serialnr", serial),
            (Interface::Vxi11, "name", name),
        ];
        for (interface, param, value) in cases {
            let mut values = vec![(param, ParamValue::from(value))];
            if interface == Interface::Vxi11 {
                values.push(("host", ParamValue::from("10.0.0.2")));
            }
            if let Ok(params) = Params::build(interface, values) {
                prop_assert_eq!(reparse(interface, &params), params);
            }
        }
    }

    #[test]
    fn usbtmc_hex_and_decimal_ids_agree(
        vendor in 0i64..=0xffff,
        product in 0i64..=0xffff,
        serial in "[A-Z0-9]{4,12}",
    ) {
        let hex = format!("usbtmc:vendorid=0x{:04x}:productid=0x{:X}:serialnr={}", vendor, product, serial);
        let dec = format!("usbtmc:vendorid={}:productid={}:serialnr={}", vendor, product, serial);
        prop_assert_eq!(
            parse(Interface::Usbtmc, &hex, None).unwrap(),
            parse(Interface::Usbtmc, &dec, None).unwrap()
        );
    }

    #[test]
    fn parser_never_panics(input in ".{0,64}") {
        let _ = parse_any(&input, None);
    }
}
