pub const DEFAULT_AREA: &str = "tokyo";

/// Ward, city and neighborhood names mapped to Tabelog area codes.
const AREA_CODES: &[(&str, &str)] = &[
    // Tokyo 23 wards
    ("chiyoda", "tokyo/A1301"),
    ("chuo", "tokyo/A1302"),
    ("shibuya", "tokyo/A1303"),
    ("shinjuku", "tokyo/A1304"),
    ("minato", "tokyo/A1307"),
    ("bunkyo", "tokyo/A1310"),
    ("taito", "tokyo/A1311"),
    ("sumida", "tokyo/A1312"),
    ("koto", "tokyo/A1313"),
    ("shinagawa", "tokyo/A1314"),
    ("meguro", "tokyo/A1316"),
    ("ota", "tokyo/A1317"),
    ("setagaya", "tokyo/A1318"),
    ("nakano", "tokyo/A1319"),
    ("suginami", "tokyo/A1320"),
    ("toshima", "tokyo/A1321"),
    ("kita", "tokyo/A1322"),
    ("arakawa", "tokyo/A1323"),
    ("itabashi", "tokyo/A1324"),
    ("nerima", "tokyo/A1325"),
    ("adachi", "tokyo/A1326"),
    ("katsushika", "tokyo/A1327"),
    ("edogawa", "tokyo/A1328"),
    // Tokyo cities
    ("hachioji", "tokyo/A1329"),
    ("tachikawa", "tokyo/A1330"),
    ("musashino", "tokyo/A1331"),
    ("mitaka", "tokyo/A1332"),
    ("fuchu", "tokyo/A1333"),
    ("chofu", "tokyo/A1334"),
    ("machida", "tokyo/A1335"),
    ("koganei", "tokyo/A1336"),
    ("kodaira", "tokyo/A1337"),
    ("hino", "tokyo/A1338"),
    ("higashimurayama", "tokyo/A1339"),
    ("kokubunji", "tokyo/A1340"),
    ("kunitachi", "tokyo/A1341"),
    // Neighborhoods
    ("roppongi", "tokyo/A1307"),
    ("ginza", "tokyo/A1302"),
    ("asakusa", "tokyo/A1311"),
    ("ueno", "tokyo/A1311"),
    ("ikebukuro", "tokyo/A1321"),
    ("ebisu", "tokyo/A1303"),
    ("harajuku", "tokyo/A1303"),
    ("akihabara", "tokyo/A1301"),
    ("nakameguro", "tokyo/A1316"),
    ("daikanyama", "tokyo/A1303"),
    ("jiyugaoka", "tokyo/A1316"),
    ("shimokitazawa", "tokyo/A1318"),
    ("kichijoji", "tokyo/A1331"),
    ("koenji", "tokyo/A1320"),
    ("komaba", "tokyo/A1316"),
];

#[derive(Clone, Copy, Debug, Default)]
pub struct AreaMapper;

impl AreaMapper {
    pub fn new() -> Self {
        Self
    }

    /// "Nakameguro, Meguro City, Tokyo" -> "tokyo/A1316". The longest matching
    /// name wins so "nakameguro" beats "nakano" and "meguro".
    pub fn map_to_tabelog_area(&self, address: &str) -> &'static str {
        self.lookup(address).unwrap_or(DEFAULT_AREA)
    }

    /// Area for a scrape request. Addresses naming a known ward or neighborhood
    /// become its area code; anything else ("osaka", "tokyo/A1303") is kept as given.
    pub fn resolve(&self, area: &str) -> String {
        match self.lookup(area) {
            Some(code) => code.to_string(),
            None => area.trim().to_string(),
        }
    }

    fn lookup(&self, address: &str) -> Option<&'static str> {
        let address = address.trim().to_lowercase();
        AREA_CODES
            .iter()
            .filter(|(name, _)| address.contains(name))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, code)| *code)
    }
}
