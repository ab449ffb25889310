//! End-to-end tests against a synthetic dataset

use std::net::TcpListener;
use std::thread;

use tempfile::TempDir;

use banchi::builder::{AddressEntry, TreeBuilder};
use banchi::proto::{self, Request, Response};
use banchi::storage::DatasetMetadata;
use banchi::tree::{AddressTree, AzaSkip, LocalTree, RemoteTree, SearchConfig};
use banchi::{AddressLevel, GeocodeError};

const PREF: i8 = AddressLevel::PREF;
const CITY: i8 = AddressLevel::CITY;
const WARD: i8 = AddressLevel::WARD;
const OAZA: i8 = AddressLevel::OAZA;
const AZA: i8 = AddressLevel::AZA;
const BLOCK: i8 = AddressLevel::BLOCK;
const BLD: i8 = AddressLevel::BLD;

const NO_COORD: f64 = 999.9;

fn e(name: &str, level: i8, x: f64, y: f64) -> AddressEntry {
    AddressEntry::new(name, level, x, y)
}

/// A small national-dataset stand-in with the notation quirks the engine
/// has to handle.
fn build_dataset() -> TempDir {
    let dir = TempDir::new().unwrap();
    let mut builder = TreeBuilder::new();
    builder.set_metadata(DatasetMetadata {
        title: "test addresses".to_string(),
        url: "https://example.com/test".to_string(),
        version: "20260801".to_string(),
    });

    let tokyo = || e("東京都", PREF, 139.6917, 35.6896).with_note("jisx0401:13");
    let shinjuku = || e("新宿区", CITY, 139.7036, 35.6938).with_note("jisx0402:13104");
    let nishishinjuku = || e("西新宿", OAZA, 139.6946, 35.6899);

    builder.add_address(
        &[
            tokyo(),
            shinjuku(),
            nishishinjuku(),
            e("一丁目", AZA, 139.6986, 35.6920).with_note("postcode:1600023/aza_id:0001001"),
        ],
        1,
    );
    builder.add_address(
        &[
            tokyo(),
            shinjuku(),
            nishishinjuku(),
            e("二丁目", AZA, 139.69175, 35.68960).with_note("postcode:1600023/aza_id:0001002"),
            e("8番", BLOCK, 139.6918, 35.6896),
        ],
        1,
    );
    builder.add_address(
        &[
            tokyo(),
            shinjuku(),
            nishishinjuku(),
            e("二丁目", AZA, 139.69175, 35.68960),
            e("7番", BLOCK, 139.6930, 35.6890),
        ],
        1,
    );
    builder.add_address(
        &[
            tokyo(),
            shinjuku(),
            nishishinjuku(),
            e("三丁目", AZA, 139.6900, 35.6850),
        ],
        1,
    );
    // A renamed oaza redirecting to its current address
    builder.add_address(
        &[
            tokyo(),
            shinjuku(),
            e("角筈", OAZA, NO_COORD, NO_COORD).with_note("ref:東京都新宿区西新宿"),
        ],
        1,
    );
    builder.add_address(
        &[
            tokyo(),
            e("多摩市", CITY, 139.4463, 35.6369).with_note("jisx0402:13224"),
            e("落合", OAZA, 139.4288, 35.6257),
            e("一丁目", AZA, 139.4290, 35.6258),
            e("15番地", BLOCK, 139.4289, 35.6257),
            e("2", BLD, 139.42897, 35.62577),
        ],
        1,
    );
    // Sapporo-style 条 notation
    builder.add_address(
        &[
            e("北海道", PREF, 141.3469, 43.0646).with_note("jisx0401:01"),
            e("札幌市", CITY, 141.3544, 43.0618).with_note("jisx0402:01100"),
            e("中央区", WARD, 141.3539, 43.0555),
            e("北三条", OAZA, 141.3512, 43.0639),
            e("西一丁目", AZA, 141.3525, 43.0641),
            e("7番地", BLOCK, 141.3528, 43.0642),
        ],
        1,
    );
    // Kyoto street-name notation
    builder.add_address(
        &[
            e("京都府", PREF, 135.7556, 35.0211).with_note("jisx0401:26"),
            e("京都市", CITY, 135.7681, 35.0116).with_note("jisx0402:26100"),
            e("上京区", WARD, 135.7556, 35.0302),
            e("藪之内町", OAZA, 135.7585, 35.0254),
        ],
        1,
    );
    // The same oaza notation in two cities, different source priority
    builder.add_address(
        &[
            e("千葉県", PREF, 140.1233, 35.6047).with_note("jisx0401:12"),
            e("千葉市", CITY, 140.1065, 35.6073).with_note("jisx0402:12100"),
            e("中央区", WARD, 140.1277, 35.6090),
            e("中央", OAZA, 140.1233, 35.6078),
        ],
        2,
    );
    builder.add_address(
        &[
            e("神奈川県", PREF, 139.6425, 35.4478).with_note("jisx0401:14"),
            e("相模原市", CITY, 139.3542, 35.5712).with_note("jisx0402:14150"),
            e("中央区", WARD, 139.3735, 35.5717),
            e("中央", OAZA, 139.3712, 35.5732),
        ],
        1,
    );
    // A dataset gap: the query may spell an aza missing from the tree
    builder.add_address(
        &[
            e("岩手県", PREF, 141.1527, 39.7036).with_note("jisx0401:03"),
            e("大船渡市", CITY, 141.7085, 39.0820).with_note("jisx0402:03203"),
            e("盛町", OAZA, 141.7190, 39.0850),
            e("7番地", BLOCK, 141.7195, 39.0853),
        ],
        1,
    );

    builder.write(dir.path()).unwrap();
    dir
}

fn open(dir: &TempDir) -> LocalTree {
    LocalTree::open(dir.path()).unwrap()
}

#[test]
fn test_search_node_block_level() {
    let dir = build_dataset();
    let tree = open(&dir);

    let results = tree.search_node("新宿区西新宿2-8-1").unwrap();
    assert!(!results.is_empty());

    let top = &results[0];
    assert_eq!(top.matched, "新宿区西新宿2-8-");
    assert_eq!(top.node.name, "8番");
    assert_eq!(top.node.level, AddressLevel::BLOCK);
    assert!((top.node.x - 139.6918).abs() < 1.0e-4);
    assert!((top.node.y - 35.6896).abs() < 1.0e-4);

    // With best_only every result shares the same matched length
    let len = top.matched.chars().count();
    for result in &results {
        assert_eq!(result.matched.chars().count(), len);
    }
}

#[test]
fn test_search_full_query_consumed() {
    let dir = build_dataset();
    let tree = open(&dir);

    let result = tree.search("多摩市落合1-15-2").unwrap();
    assert_eq!(result.matched, "多摩市落合1-15-2");
    let top = &result.candidates[0];
    assert_eq!(top.level, AddressLevel::BLD);
    assert_eq!(
        top.fullname,
        vec!["東京都", "多摩市", "落合", "一丁目", "15番地", "2"]
    );
}

#[test]
fn test_search_trailing_text_ignored() {
    let dir = build_dataset();
    let tree = open(&dir);

    let result = tree.search("多摩市落合1-15-2多摩センタービル").unwrap();
    assert_eq!(result.matched, "多摩市落合1-15-2");
}

#[test]
fn test_sapporo_jo_elision() {
    let dir = build_dataset();
    let tree = open(&dir);

    let result = tree.search("札幌市中央区北3西1-7").unwrap();
    assert_eq!(result.matched, "札幌市中央区北3西1-7");
    assert_eq!(
        result.candidates[0].fullname,
        vec!["北海道", "札幌市", "中央区", "北三条", "西一丁目", "7番地"]
    );
}

#[test]
fn test_kyoto_street_name() {
    let dir = build_dataset();
    let tree = open(&dir);

    let result = tree
        .search("京都市上京区下立売通新町西入藪之内町")
        .unwrap();
    assert_eq!(
        result.candidates[0].fullname,
        vec!["京都府", "京都市", "上京区", "藪之内町"]
    );
}

#[test]
fn test_aza_skip_modes() {
    let dir = build_dataset();
    let mut tree = open(&dir);

    // The dataset lacks the aza between 盛町 and the block number
    let result = tree.search("大船渡市盛町字宇津野沢7").unwrap();
    assert_eq!(result.matched, "大船渡市盛町字宇津野沢7");
    assert_eq!(result.candidates[0].level, AddressLevel::BLOCK);

    let mut config = SearchConfig::default();
    config.aza_skip = AzaSkip::Off;
    tree.set_config(config).unwrap();
    let result = tree.search("大船渡市盛町字宇津野沢7").unwrap();
    assert!(result.matched.chars().count() < "大船渡市盛町字宇津野沢7".chars().count());
}

#[test]
fn test_priority_tie_break() {
    let dir = build_dataset();
    let tree = open(&dir);

    let results = tree.search_node("中央区中央").unwrap();
    assert!(results.len() >= 2);
    // Lower priority (the more authoritative source) sorts first
    assert_eq!(results[0].node.priority, 1);
    let fullname = tree.get_fullname(&results[0].node).unwrap();
    assert_eq!(fullname[0], "神奈川県");
}

#[test]
fn test_redirect_followed() {
    let dir = build_dataset();
    let mut tree = open(&dir);

    let results = tree.search_node("新宿区角筈2-8-1").unwrap();
    assert_eq!(results[0].matched, "新宿区角筈2-8-");
    assert_eq!(results[0].node.name, "8番");

    // Without auto_redirect the renamed oaza is a dead end
    let mut config = SearchConfig::default();
    config.auto_redirect = false;
    tree.set_config(config).unwrap();
    let results = tree.search_node("新宿区角筈2-8-1").unwrap();
    assert!(results[0].matched.chars().count() < 7);
}

#[test]
fn test_no_match_returns_empty() {
    let dir = build_dataset();
    let tree = open(&dir);

    let results = tree.search_node("あいうえおかきくけこ").unwrap();
    assert!(results.is_empty());

    let result = tree.search("あいうえおかきくけこ").unwrap();
    assert_eq!(result.matched, "");
    assert!(result.candidates.is_empty());
}

#[test]
fn test_target_area_subset() {
    let dir = build_dataset();
    let mut tree = open(&dir);

    let unrestricted: Vec<u32> = tree
        .search_node("落合1-15-2")
        .unwrap()
        .into_iter()
        .map(|r| r.node.id)
        .collect();

    let mut config = SearchConfig::default();
    config.target_area = vec!["多摩市".to_string()];
    tree.set_config(config).unwrap();
    let restricted = tree.search_node("落合1-15-2").unwrap();

    assert!(!restricted.is_empty());
    for result in &restricted {
        assert!(unrestricted.contains(&result.node.id));
    }
    assert_eq!(
        tree.get_fullname(&restricted[0].node).unwrap(),
        vec!["東京都", "多摩市", "落合", "一丁目", "15番地", "2"]
    );
}

#[test]
fn test_target_area_by_code() {
    let dir = build_dataset();
    let mut tree = open(&dir);

    let mut config = SearchConfig::default();
    config.target_area = vec!["13104".to_string()];
    tree.set_config(config).unwrap();

    let results = tree.search_node("西新宿2-8-1").unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].node.name, "8番");
}

#[test]
fn test_invalid_target_area_is_config_error() {
    let dir = build_dataset();
    let tree = open(&dir);

    let mut config = SearchConfig::default();
    config.target_area = vec!["存在しない県".to_string()];

    match tree.search_node_with("西新宿2-8-1", &config) {
        Err(GeocodeError::Config(msg)) => assert!(msg.contains("存在しない県")),
        other => panic!("expected a config error, got {:?}", other),
    }
}

#[test]
fn test_parent_chain_roundtrip() {
    let dir = build_dataset();
    let tree = open(&dir);

    let count = tree.count_records().unwrap() as u32;
    for id in 0..count {
        let mut node = tree.get_node_by_id(id).unwrap();
        let mut steps = 0;
        while node.id != 0 {
            node = tree.get_node_by_id(node.parent_id).unwrap();
            steps += 1;
            assert!(steps <= 8, "parent chain of node {} exceeds max depth", id);
        }
    }
}

#[test]
fn test_reverse_nearest_chome() {
    let dir = build_dataset();
    let tree = open(&dir);

    let results = tree.reverse(139.6917, 35.6896, Some(AddressLevel::AZA)).unwrap();
    assert!(!results.is_empty());

    let top = &results[0];
    assert_eq!(top.candidate.name, "二丁目");
    assert!(top.dist < 20.0, "distance too large: {}", top.dist);

    // Ascending distance
    for pair in results.windows(2) {
        assert!(pair[0].dist <= pair[1].dist);
    }
}

#[test]
fn test_reverse_block_level() {
    let dir = build_dataset();
    let tree = open(&dir);

    // Query on the block's own representative point
    let results = tree
        .reverse(139.6918, 35.6896, Some(AddressLevel::BLOCK))
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].candidate.name, "8番");
    assert_eq!(results[0].candidate.level, AddressLevel::BLOCK);
    for pair in results.windows(2) {
        assert!(pair[0].dist <= pair[1].dist);
    }
}

#[test]
fn test_reverse_invalid_level() {
    let dir = build_dataset();
    let tree = open(&dir);

    assert!(matches!(
        tree.reverse(139.69, 35.68, Some(9)),
        Err(GeocodeError::Config(_))
    ));
}

#[test]
fn test_reverse_index_persisted() {
    let dir = build_dataset();
    {
        let tree = open(&dir);
        tree.reverse(139.6917, 35.6896, None).unwrap();
    }
    assert!(dir.path().join("rtree.idx").exists());

    // A fresh instance reuses the persisted index
    let tree = open(&dir);
    let results = tree.reverse(139.6917, 35.6896, None).unwrap();
    assert_eq!(results[0].candidate.name, "二丁目");
}

#[test]
fn test_code_lookups() {
    let dir = build_dataset();
    let tree = open(&dir);

    let by_postcode = tree.search_by_postcode("160-0023").unwrap();
    let names: Vec<&str> = by_postcode.iter().map(|n| n.name.as_str()).collect();
    assert!(names.contains(&"一丁目"));
    assert!(names.contains(&"二丁目"));

    let by_pref = tree.search_by_prefcode("13").unwrap();
    assert_eq!(by_pref[0].name, "東京都");

    let by_city = tree.search_by_citycode("13104").unwrap();
    assert_eq!(by_city[0].name, "新宿区");

    let by_aza = tree.search_by_machiaza_id("131040001002").unwrap();
    assert_eq!(by_aza.len(), 1);
    assert_eq!(by_aza[0].name, "二丁目");

    assert!(tree.search_by_postcode("0000000").unwrap().is_empty());
}

#[test]
fn test_dictionary_version() {
    let dir = build_dataset();
    let tree = open(&dir);
    assert_eq!(tree.installed_dictionary_version().unwrap(), "20260801");
}

#[test]
fn test_remote_tree_protocol() {
    // A one-request stand-in server driving the client's framing
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let msg = proto::read_message(&mut stream).unwrap().unwrap();
        let request: Request = rmp_serde::from_slice(&msg).unwrap();
        assert!(matches!(request, Request::NodeCount));

        let response = Response::Count { count: 12345 };
        let bytes = rmp_serde::to_vec_named(&response).unwrap();
        proto::write_message(&mut stream, &bytes).unwrap();
    });

    let tree = RemoteTree::new(&addr.to_string()).unwrap();
    assert_eq!(tree.count_records().unwrap(), 12345);
    server.join().unwrap();
}
