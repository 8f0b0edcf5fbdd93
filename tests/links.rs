use pinpoint::links::{parse_links, parse_share_link, LinkError};
use pinpoint::model::{
    ProtocolSettings, RealitySettings, TlsConfig, Transport, TunnelSource, TunnelType,
};

#[test]
fn vless_reality_link() {
    let link = "vless://11111111-2222-3333-4444-555555555555@1.2.3.4:443?security=reality&sni=google.com&fp=chrome&pbk=KEY123&sid=ab#MyServer";
    let tunnel = parse_share_link(link).unwrap();

    assert_eq!(tunnel.kind(), TunnelType::Vless);
    assert_eq!(tunnel.name, "MyServer");
    assert_eq!(tunnel.server, "1.2.3.4");
    assert_eq!(tunnel.port, 443);
    assert!(tunnel.enabled);
    assert_eq!(tunnel.source, TunnelSource::Import);
    assert_eq!(
        tunnel.tls,
        TlsConfig::Reality(RealitySettings {
            server_name: "google.com".into(),
            fingerprint: "chrome".into(),
            public_key: "KEY123".into(),
            short_id: "ab".into(),
        })
    );
    match &tunnel.settings {
        ProtocolSettings::Vless(s) => {
            assert_eq!(s.uuid, "11111111-2222-3333-4444-555555555555");
            assert_eq!(s.encryption, "none");
        }
        other => panic!("unexpected settings: {other:?}"),
    }
}

#[test]
fn shadowsocks_sip002_and_legacy_agree() {
    let sip002 = parse_share_link("ss://YWVzLTI1Ni1nY206c2VjcmV0@5.6.7.8:8388#ss1").unwrap();
    let legacy =
        parse_share_link("ss://YWVzLTI1Ni1nY206c2VjcmV0QDUuNi43Ljg6ODM4OA==#ss1").unwrap();

    for tunnel in [&sip002, &legacy] {
        assert_eq!(tunnel.server, "5.6.7.8");
        assert_eq!(tunnel.port, 8388);
        assert_eq!(tunnel.name, "ss1");
        match &tunnel.settings {
            ProtocolSettings::Shadowsocks(s) => {
                assert_eq!(s.method, "aes-256-gcm");
                assert_eq!(s.password, "secret");
            }
            other => panic!("unexpected settings: {other:?}"),
        }
    }
    assert_eq!(sip002.settings, legacy.settings);
}

#[test]
fn vmess_ws_tls() {
    let link = "vmess://eyJ2IjoiMiIsInBzIjoidm0iLCJhZGQiOiI5LjkuOS45IiwicG9ydCI6IjQ0MyIsImlkIjoiYWFhYSIsImFpZCI6IjAiLCJuZXQiOiJ3cyIsInBhdGgiOiIvcmF5IiwiaG9zdCI6ImNkbi5leGFtcGxlLmNvbSIsInRscyI6InRscyJ9";
    let tunnel = parse_share_link(link).unwrap();

    assert_eq!(tunnel.kind(), TunnelType::Vmess);
    assert_eq!(tunnel.name, "vm");
    assert_eq!(tunnel.server, "9.9.9.9");
    assert_eq!(tunnel.port, 443);
    assert_eq!(
        tunnel.transport,
        Transport::Ws {
            path: "/ray".into(),
            host: Some("cdn.example.com".into()),
        }
    );
    match &tunnel.tls {
        TlsConfig::Tls(tls) => assert_eq!(tls.server_name, "cdn.example.com"),
        other => panic!("expected tls, got {other:?}"),
    }
}

#[test]
fn trojan_and_hysteria2_always_use_tls() {
    let trojan = parse_share_link("trojan://p%40ss@t.example.com:443?type=grpc&serviceName=svc#T").unwrap();
    match &trojan.settings {
        ProtocolSettings::Trojan(s) => assert_eq!(s.password, "p@ss"),
        other => panic!("unexpected settings: {other:?}"),
    }
    assert!(trojan.tls.is_enabled());
    assert_eq!(
        trojan.transport,
        Transport::Grpc {
            service_name: "svc".into()
        }
    );

    let hy2 = parse_share_link(
        "hy2://pw@h.example.com:8443?sni=real.example.com&obfs=salamander&obfs-password=x&up=100%20mbps#H",
    )
    .unwrap();
    assert_eq!(hy2.kind(), TunnelType::Hysteria2);
    match &hy2.settings {
        ProtocolSettings::Hysteria2(s) => {
            assert_eq!(s.password, "pw");
            assert_eq!(s.obfs_type, "salamander");
            assert_eq!(s.obfs_password, "x");
            assert_eq!(s.up_mbps, Some(100));
            assert_eq!(s.down_mbps, None);
        }
        other => panic!("unexpected settings: {other:?}"),
    }
    match &hy2.tls {
        TlsConfig::Tls(tls) => assert_eq!(tls.server_name, "real.example.com"),
        other => panic!("expected tls, got {other:?}"),
    }

    let alias = parse_share_link("hysteria2://pw@h.example.com:8443").unwrap();
    assert_eq!(alias.name, "Hysteria2 Server");
}

#[test]
fn malformed_links_are_errors() {
    assert_eq!(
        parse_share_link("vless://1.2.3.4:443").unwrap_err(),
        LinkError::MissingUserInfo
    );
    assert!(matches!(
        parse_share_link("vless://u@1.2.3.4"),
        Err(LinkError::InvalidAddress(_))
    ));
    assert!(matches!(
        parse_share_link("vmess://not base64!"),
        Err(LinkError::InvalidBase64)
    ));
    assert!(matches!(
        parse_share_link("socks5://1.2.3.4:1080"),
        Err(LinkError::UnsupportedScheme(_))
    ));
}

#[test]
fn each_parsed_tunnel_gets_its_own_id() {
    let text = "vless://u@1.2.3.4:443#a\nvless://u@1.2.3.4:443#a\nbogus\n";
    let tunnels = parse_links(text);
    assert_eq!(tunnels.len(), 2);
    assert_ne!(tunnels[0].id, tunnels[1].id);
}
