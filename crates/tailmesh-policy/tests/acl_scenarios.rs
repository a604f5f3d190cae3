//! end-to-end scenarios: document -> compiled rules -> per-node maps.

use std::net::IpAddr;

use tailmesh_policy::{InventorySnapshot, NetMapSet, PolicyDocument, build_netmaps, compile};
use tailmesh_types::test_utils::users_with_nodes;
use tailmesh_types::{Generation, NodeId, PolicyVersion};

/// 30 adjacent blocks covering most of ipv4 (including the overlay range).
const VERY_LARGE_DESTINATION: &[&str] = &[
    "0.0.0.0/5:*",
    "8.0.0.0/7:*",
    "11.0.0.0/8:*",
    "12.0.0.0/6:*",
    "16.0.0.0/4:*",
    "32.0.0.0/3:*",
    "64.0.0.0/2:*",
    "128.0.0.0/3:*",
    "160.0.0.0/5:*",
    "168.0.0.0/6:*",
    "172.0.0.0/12:*",
    "172.32.0.0/11:*",
    "172.64.0.0/10:*",
    "172.128.0.0/9:*",
    "173.0.0.0/8:*",
    "174.0.0.0/7:*",
    "176.0.0.0/4:*",
    "192.0.0.0/9:*",
    "192.128.0.0/11:*",
    "192.160.0.0/13:*",
    "192.169.0.0/16:*",
    "192.170.0.0/15:*",
    "192.172.0.0/14:*",
    "192.176.0.0/12:*",
    "192.192.0.0/10:*",
    "193.0.0.0/8:*",
    "194.0.0.0/7:*",
    "196.0.0.0/6:*",
    "200.0.0.0/5:*",
    "208.0.0.0/4:*",
];

fn inventory(users: u64, per_user: u64) -> InventorySnapshot {
    let (users, nodes) = users_with_nodes(users, per_user);
    InventorySnapshot::new(nodes, users, Generation(1))
}

fn maps(json: &str, inventory: &InventorySnapshot) -> NetMapSet {
    let document = PolicyDocument::from_json(json).expect("valid json");
    build_netmaps(&document, inventory, PolicyVersion::INITIAL).expect("policy builds")
}

fn peer_counts(set: &NetMapSet) -> Vec<usize> {
    set.iter().map(|(_, map)| map.peers().len()).collect()
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// whether `from` may open a connection to `to` at `dst:port`, including
/// the visibility both ends need for the session to exist.
fn can_reach(set: &NetMapSet, from: u64, to: u64, dst: &str, port: u16) -> bool {
    let (from, to) = (NodeId::new(from), NodeId::new(to));
    let inbound = set
        .get(to)
        .and_then(|map| map.peer(from))
        .is_some_and(|peer| peer.allows(ip(dst), port));
    let visible = set.get(from).is_some_and(|map| map.peer(to).is_some());
    inbound && visible
}

fn acl(src: &[&str], dst: &[&str]) -> String {
    let quote = |items: &[&str]| {
        items
            .iter()
            .map(|s| format!("\"{s}\""))
            .collect::<Vec<_>>()
            .join(",")
    };
    format!(
        r#"{{"action": "accept", "src": [{}], "dst": [{}]}}"#,
        quote(src),
        quote(dst)
    )
}

fn policy(acls: &[String]) -> String {
    format!(r#"{{"acls": [{}]}}"#, acls.join(","))
}

#[test]
fn base_acls_every_node_sees_every_other() {
    let inventory = inventory(2, 2);
    let set = maps(&policy(&[acl(&["*"], &["*:*"])]), &inventory);
    assert_eq!(peer_counts(&set), vec![3, 3, 3, 3]);
}

#[test]
fn peer_count_is_total_minus_one() {
    for (users, per_user) in [(1, 2), (3, 2), (4, 5)] {
        let inventory = inventory(users, per_user);
        let set = maps(&policy(&[acl(&["*"], &["*:*"])]), &inventory);
        let expected = (users * per_user - 1) as usize;
        assert!(peer_counts(&set).iter().all(|&n| n == expected));
    }
}

#[test]
fn isolated_users_only_see_themselves() {
    for per_user in [2, 3] {
        let inventory = inventory(2, per_user);
        let set = maps(
            &policy(&[
                acl(&["user1@"], &["user1@:*"]),
                acl(&["user2@"], &["user2@:*"]),
            ]),
            &inventory,
        );
        let expected = (per_user - 1) as usize;
        assert!(peer_counts(&set).iter().all(|&n| n == expected));
    }
}

#[test]
fn restricted_to_port_22_still_present_in_netmap() {
    let inventory = inventory(2, 2);
    let set = maps(
        &policy(&[
            acl(&["user1@"], &["user1@:22"]),
            acl(&["user2@"], &["user2@:22"]),
            acl(&["user1@"], &["user2@:22"]),
            acl(&["user2@"], &["user1@:22"]),
        ]),
        &inventory,
    );
    assert_eq!(peer_counts(&set), vec![3, 3, 3, 3]);
    assert!(can_reach(&set, 1, 3, "100.64.0.3", 22));
    assert!(!can_reach(&set, 1, 3, "100.64.0.3", 80));
}

#[test]
fn one_way_access_keeps_return_path() {
    let inventory = inventory(2, 2);
    let set = maps(
        &policy(&[
            acl(&["user1@"], &["user1@:*"]),
            acl(&["user2@"], &["user2@:*"]),
            acl(&["user1@"], &["user2@:*"]),
        ]),
        &inventory,
    );
    assert_eq!(peer_counts(&set), vec![3, 3, 3, 3]);

    // user2's map holds user1's nodes, but they can't be dialled
    assert!(can_reach(&set, 1, 3, "100.64.0.3", 443));
    assert!(!can_reach(&set, 3, 1, "100.64.0.1", 443));
}

#[test]
fn very_large_destination_matches_wildcard_peer_set() {
    let inventory = inventory(2, 2);
    fn with_blocks(own: &'static str) -> Vec<&'static str> {
        let mut dst = vec![own];
        dst.extend_from_slice(VERY_LARGE_DESTINATION);
        dst
    }
    let document = policy(&[
        acl(&["user1@"], &with_blocks("user1@:*")),
        acl(&["user2@"], &with_blocks("user2@:*")),
        acl(&["user1@"], &with_blocks("user2@:*")),
    ]);

    let set = maps(&document, &inventory);
    let wildcard = maps(&policy(&[acl(&["*"], &["*:*"])]), &inventory);
    assert_eq!(peer_counts(&set), vec![3, 3, 3, 3]);
    for (id, map) in set.iter() {
        assert_eq!(map.peer_ids(), wildcard.get(id).unwrap().peer_ids());
    }

    // the blocks aggregate instead of multiplying
    let compiled = compile(
        &PolicyDocument::from_json(&document)
            .unwrap()
            .validate()
            .unwrap(),
        &inventory,
    )
    .unwrap();
    assert!(compiled.len() <= 3);
    for rule in compiled.rules() {
        // the overlay ipv4 addresses fold into 64.0.0.0/2, only ipv6 adds
        assert!(rule.destinations.len() <= VERY_LARGE_DESTINATION.len() + inventory.nodes().len());
    }
}

#[test]
fn ipv6_and_ipv4_default_routes_act_as_wildcard() {
    let inventory = inventory(2, 2);
    let set = maps(
        &policy(&[acl(&["*"], &["0.0.0.0/0:*", "::/0:*"])]),
        &inventory,
    );
    assert_eq!(peer_counts(&set), vec![3, 3, 3, 3]);
    assert!(can_reach(&set, 4, 1, "fd7a:115c:a1e0::1", 80));
}

#[test]
fn user_to_user_port_80() {
    let inventory = inventory(2, 2);
    let set = maps(&policy(&[acl(&["user1@"], &["user2@:80"])]), &inventory);

    for from in [1, 2] {
        for to in [3, 4] {
            let dst = format!("100.64.0.{to}");
            assert!(can_reach(&set, from, to, &dst, 80));
            assert!(!can_reach(&set, from, to, &dst, 22));
            assert!(!can_reach(&set, to, from, &format!("100.64.0.{from}"), 80));
        }
    }
    // user1 is not granted access to its own machines
    assert!(!can_reach(&set, 1, 2, "100.64.0.2", 80));
}

#[test]
fn group_limited_to_port_22_denies_port_80() {
    let inventory = inventory(2, 2);
    let set = maps(
        r#"{"groups": {"group:integration-acl-test": ["user1@", "user2@"]},
            "acls": [{"action": "accept", "src": ["group:integration-acl-test"], "dst": ["*:22"]}]}"#,
        &inventory,
    );

    for from in 1..=4u64 {
        for to in (1..=4u64).filter(|to| *to != from) {
            let dst = format!("100.64.0.{to}");
            assert!(can_reach(&set, from, to, &dst, 22));
            assert!(!can_reach(&set, from, to, &dst, 80));
        }
    }
}

#[test]
fn user_to_star_reaches_everyone() {
    let inventory = inventory(2, 2);
    let set = maps(&policy(&[acl(&["user1@"], &["*:*"])]), &inventory);

    assert!(can_reach(&set, 1, 2, "100.64.0.2", 80));
    assert!(can_reach(&set, 1, 4, "fd7a:115c:a1e0::4", 80));
    assert!(!can_reach(&set, 3, 1, "100.64.0.1", 80));
    assert!(!can_reach(&set, 3, 4, "100.64.0.4", 80));
}

#[test]
fn named_host_subnet_reaches_everyone() {
    let inventory = inventory(2, 2);
    let set = maps(
        r#"{"hosts": {"all": "100.64.0.0/24"},
            "acls": [{"action": "accept", "src": ["*"], "dst": ["all:*"]}]}"#,
        &inventory,
    );

    assert_eq!(peer_counts(&set), vec![3, 3, 3, 3]);
    assert!(can_reach(&set, 1, 3, "100.64.0.3", 80));
    assert!(can_reach(&set, 3, 1, "100.64.0.1", 80));
    // the alias only names the ipv4 range
    assert!(!can_reach(&set, 3, 1, "fd7a:115c:a1e0::1", 80));
}

#[test]
fn host_alias_compiles_like_its_literal() {
    let inventory = inventory(2, 2);
    let compile_json = |json: &str| {
        let policy = PolicyDocument::from_json(json)
            .unwrap()
            .validate()
            .unwrap();
        compile(&policy, &inventory).unwrap()
    };

    for target in [
        "100.64.0.0/24",
        "100.64.0.3",
        "fd7a:115c:a1e0::/48",
        "fd7a:115c:a1e0::2",
        "10.0.0.0/8",
    ] {
        let aliased = compile_json(&format!(
            r#"{{"hosts": {{"h": "{target}"}},
                 "acls": [
                    {{"action": "accept", "src": ["h"], "dst": ["*:22"]}},
                    {{"action": "accept", "src": ["user1@"], "dst": ["h:80-90"]}}
                 ]}}"#
        ));
        let literal = compile_json(&policy(&[
            acl(&[target], &["*:22"]),
            acl(&["user1@"], &[&format!("{target}:80-90")]),
        ]));

        assert_eq!(aliased.rules(), literal.rules(), "{target}");
        assert_eq!(aliased.to_filter_rules(), literal.to_filter_rules(), "{target}");
        assert_eq!(aliased.len(), 2, "{target}");
    }
}

#[test]
fn named_hosts_per_address_family() {
    let families = [
        ("100.64.0.1", "100.64.0.2", "100.64.0.3"),
        ("fd7a:115c:a1e0::1", "fd7a:115c:a1e0::2", "fd7a:115c:a1e0::3"),
    ];

    for (test1, test2, test3) in families {
        let inventory = inventory(2, 2);
        let document = format!(
            r#"{{"hosts": {{"test1": "{test1}", "test2": "{test2}", "test3": "{test3}"}},
                 "acls": [
                    {{"action": "accept", "src": ["*"], "dst": ["test3:*"]}},
                    {{"action": "accept", "src": ["test1"], "dst": ["test2:*"]}}
                 ]}}"#
        );
        let set = maps(&document, &inventory);

        for family in ["100.64.0.", "fd7a:115c:a1e0::"] {
            let addr = |n: u64| format!("{family}{n}");
            // everyone can reach test3
            assert!(can_reach(&set, 1, 3, &addr(3), 80));
            assert!(can_reach(&set, 2, 3, &addr(3), 80));
            // test1 can reach test2, not the other way round
            assert!(can_reach(&set, 1, 2, &addr(2), 80));
            assert!(!can_reach(&set, 2, 1, &addr(1), 80));
            // test3 reaches nobody
            assert!(!can_reach(&set, 3, 1, &addr(1), 80));
            assert!(!can_reach(&set, 3, 2, &addr(2), 80));
        }
    }
}

#[test]
fn device1_can_access_device2() {
    let cases = [
        policy(&[acl(&["100.64.0.1"], &["100.64.0.2:*"])]),
        policy(&[acl(&["fd7a:115c:a1e0::1"], &["fd7a:115c:a1e0::2:*"])]),
        r#"{"hosts": {"test1": "100.64.0.1/32", "test2": "100.64.0.2/32"},
            "acls": [{"action": "accept", "src": ["test1"], "dst": ["test2:*"]}]}"#
            .to_string(),
        r#"{"hosts": {"test1": "fd7a:115c:a1e0::1/128", "test2": "fd7a:115c:a1e0::2/128"},
            "acls": [{"action": "accept", "src": ["test1"], "dst": ["test2:*"]}]}"#
            .to_string(),
        r#"{"groups": {"group:one": ["user1@"], "group:two": ["user2@"]},
            "acls": [{"action": "accept", "src": ["group:one"], "dst": ["group:two:*"]}]}"#
            .to_string(),
    ];

    for document in cases {
        let inventory = inventory(2, 1);
        let set = maps(&document, &inventory);

        assert!(can_reach(&set, 1, 2, "100.64.0.2", 80), "{document}");
        assert!(can_reach(&set, 1, 2, "fd7a:115c:a1e0::2", 80), "{document}");
        assert!(!can_reach(&set, 2, 1, "100.64.0.1", 80), "{document}");
        assert!(!can_reach(&set, 2, 1, "fd7a:115c:a1e0::1", 80), "{document}");
    }
}

#[test]
fn tagged_nodes_are_not_owned_by_users() {
    use tailmesh_types::test_utils::TestNodeBuilder;
    use tailmesh_types::{User, UserId};

    let inventory = InventorySnapshot::new(
        vec![
            TestNodeBuilder::new(1).with_user(1).build(),
            TestNodeBuilder::new(2).with_user(1).with_tag("tag:web").build(),
            TestNodeBuilder::new(3).with_user(2).build(),
        ],
        vec![User::new(UserId(1), "user1"), User::new(UserId(2), "user2")],
        Generation(1),
    );
    let set = maps(
        &policy(&[
            acl(&["user2@"], &["user1@:*"]),
            acl(&["autogroup:member"], &["tag:web:443"]),
        ]),
        &inventory,
    );

    assert!(can_reach(&set, 3, 1, "100.64.0.1", 22));
    assert!(!can_reach(&set, 3, 2, "100.64.0.2", 22));
    assert!(can_reach(&set, 3, 2, "100.64.0.2", 443));
    assert!(can_reach(&set, 1, 2, "100.64.0.2", 443));
}

#[test]
fn expired_nodes_neither_reach_nor_are_reached() {
    use chrono::{Duration, Utc};

    let (users, mut nodes) = users_with_nodes(2, 2);
    nodes[0].set_expiry(Some(Utc::now() - Duration::minutes(5)));
    let inventory = InventorySnapshot::new(nodes, users, Generation(1));
    let set = maps(&policy(&[acl(&["*"], &["*:*"])]), &inventory);

    assert!(set.get(NodeId::new(1)).is_none());
    assert_eq!(peer_counts(&set), vec![2, 2, 2]);
}

#[test]
fn adding_access_only_grows_peer_sets() {
    let inventory = inventory(3, 2);
    let narrow = maps(&policy(&[acl(&["user1@"], &["user2@:22"])]), &inventory);
    let wide = maps(
        &policy(&[
            acl(&["user1@"], &["user2@:22"]),
            acl(&["user3@"], &["user1@:80"]),
        ]),
        &inventory,
    );

    for (id, map) in narrow.iter() {
        let grown = wide.get(id).unwrap();
        for peer in map.peers() {
            assert!(grown.peer(peer.node_id).is_some());
        }
    }
}
