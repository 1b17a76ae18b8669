//! Placeholder payloads served when there is nothing real to serve. Their
//! content is illustrative; clients only rely on them being non-empty and
//! well-formed.

/// Base64 of [`FALLBACK_NODES`].
pub const BASE64_NODES: &str = "dHJvamFuOi8vMDAwMDAwMDAtMDAwMC0wMDAwLTAwMDAtMDAwMDAwMDAwMDAwQDEyNy4wLjAuMTo0NDMjTm8lMjBhdmFpbGFibGUlMjBub2Rlcwp2bGVzczovLzAwMDAwMDAwLTAwMDAtMDAwMC0wMDAwLTAwMDAwMDAwMDAwMEAxMjcuMC4wLjE6NDQzP2VuY3J5cHRpb249bm9uZSZzZWN1cml0eT10bHMmdHlwZT13cyNDaGVjayUyMHlvdXIlMjBzdWJzY3JpcHRpb24lMjBzb3VyY2Vz";

pub const FALLBACK_NODES: &str = "trojan://00000000-0000-0000-0000-000000000000@127.0.0.1:443#No%20available%20nodes\nvless://00000000-0000-0000-0000-000000000000@127.0.0.1:443?encryption=none&security=tls&type=ws#Check%20your%20subscription%20sources";

pub const EXPIRED_NODE: &str =
  "trojan://00000000-0000-0000-0000-000000000000@127.0.0.1:443#Subscription%20expired";

pub const CLASH_YAML: &str = r#"mixed-port: 7890
allow-lan: false
mode: rule
log-level: info
proxies:
  - name: No available nodes
    type: trojan
    server: 127.0.0.1
    port: 443
    password: 00000000-0000-0000-0000-000000000000
    skip-cert-verify: true
proxy-groups:
  - name: PROXY
    type: select
    proxies:
      - No available nodes
      - DIRECT
rules:
  - MATCH,DIRECT
"#;

pub const SINGBOX_JSON: &str = r#"{
  "log": { "level": "info" },
  "outbounds": [
    {
      "type": "trojan",
      "tag": "No available nodes",
      "server": "127.0.0.1",
      "server_port": 443,
      "password": "00000000-0000-0000-0000-000000000000",
      "tls": { "enabled": true, "insecure": true }
    },
    { "type": "direct", "tag": "direct" }
  ],
  "route": { "final": "direct" }
}
"#;
