//! Country table and name-fragment matching
//!
//! Node display names embed their region as a flag emoji, a two-letter
//! code, a CJK fragment, or an English name. Matching is case-insensitive
//! with word boundaries on latin tokens; when several countries match, the
//! earliest occurrence in the name wins, then table order.

use regex::Regex;
use std::sync::OnceLock;

/// One country the classifier can recognise
#[derive(Debug)]
pub struct CountryEntry {
    /// ISO 3166-1 alpha-2
    pub code: &'static str,
    pub flag: &'static str,
    pub name_en: &'static str,
    pub name_zh: &'static str,
    /// CJK fragments matched by containment
    pub cjk_aliases: &'static [&'static str],
    /// Latin aliases matched with word boundaries, case-insensitive
    pub latin_aliases: &'static [&'static str],
}

/// The recognised countries, shortlist members first
pub static COUNTRIES: &[CountryEntry] = &[
    CountryEntry {
        code: "HK",
        flag: "🇭🇰",
        name_en: "Hong Kong",
        name_zh: "香港",
        cjk_aliases: &["香港", "港"],
        latin_aliases: &["hong kong", "hongkong", "hk"],
    },
    CountryEntry {
        code: "TW",
        flag: "🇹🇼",
        name_en: "Taiwan",
        name_zh: "台湾",
        cjk_aliases: &["台湾", "臺灣", "台"],
        latin_aliases: &["taiwan", "tw"],
    },
    CountryEntry {
        code: "SG",
        flag: "🇸🇬",
        name_en: "Singapore",
        name_zh: "新加坡",
        cjk_aliases: &["新加坡", "狮城", "新"],
        latin_aliases: &["singapore", "sg"],
    },
    CountryEntry {
        code: "JP",
        flag: "🇯🇵",
        name_en: "Japan",
        name_zh: "日本",
        cjk_aliases: &["日本", "东京", "大阪", "日"],
        latin_aliases: &["japan", "tokyo", "osaka", "jp"],
    },
    CountryEntry {
        code: "US",
        flag: "🇺🇸",
        name_en: "United States",
        name_zh: "美国",
        cjk_aliases: &["美国", "洛杉矶", "硅谷", "美"],
        latin_aliases: &["united states", "america", "los angeles", "san jose", "usa", "us"],
    },
    CountryEntry {
        code: "KR",
        flag: "🇰🇷",
        name_en: "South Korea",
        name_zh: "韩国",
        cjk_aliases: &["韩国", "首尔", "韩"],
        latin_aliases: &["korea", "seoul", "kr"],
    },
    CountryEntry {
        code: "CN",
        flag: "🇨🇳",
        name_en: "China",
        name_zh: "中国",
        cjk_aliases: &["中国", "大陆", "沪", "京", "回国"],
        latin_aliases: &["china", "mainland", "cn"],
    },
    CountryEntry {
        code: "GB",
        flag: "🇬🇧",
        name_en: "United Kingdom",
        name_zh: "英国",
        cjk_aliases: &["英国", "伦敦", "英"],
        latin_aliases: &["united kingdom", "london", "uk", "gb"],
    },
    CountryEntry {
        code: "DE",
        flag: "🇩🇪",
        name_en: "Germany",
        name_zh: "德国",
        cjk_aliases: &["德国", "德"],
        latin_aliases: &["germany", "frankfurt", "de"],
    },
    CountryEntry {
        code: "FR",
        flag: "🇫🇷",
        name_en: "France",
        name_zh: "法国",
        cjk_aliases: &["法国", "巴黎", "法"],
        latin_aliases: &["france", "paris", "fr"],
    },
    CountryEntry {
        code: "NL",
        flag: "🇳🇱",
        name_en: "Netherlands",
        name_zh: "荷兰",
        cjk_aliases: &["荷兰", "荷"],
        latin_aliases: &["netherlands", "amsterdam", "nl"],
    },
    CountryEntry {
        code: "RU",
        flag: "🇷🇺",
        name_en: "Russia",
        name_zh: "俄罗斯",
        cjk_aliases: &["俄罗斯", "莫斯科", "俄"],
        latin_aliases: &["russia", "moscow", "ru"],
    },
    CountryEntry {
        code: "CA",
        flag: "🇨🇦",
        name_en: "Canada",
        name_zh: "加拿大",
        cjk_aliases: &["加拿大", "枫叶"],
        latin_aliases: &["canada", "toronto", "ca"],
    },
    CountryEntry {
        code: "AU",
        flag: "🇦🇺",
        name_en: "Australia",
        name_zh: "澳大利亚",
        cjk_aliases: &["澳大利亚", "悉尼", "澳"],
        latin_aliases: &["australia", "sydney", "au"],
    },
    CountryEntry {
        code: "IN",
        flag: "🇮🇳",
        name_en: "India",
        name_zh: "印度",
        cjk_aliases: &["印度"],
        // `in` is too common an English word to be a safe alias
        latin_aliases: &["india", "mumbai"],
    },
    CountryEntry {
        code: "TR",
        flag: "🇹🇷",
        name_en: "Turkey",
        name_zh: "土耳其",
        cjk_aliases: &["土耳其"],
        latin_aliases: &["turkey", "istanbul", "tr"],
    },
    CountryEntry {
        code: "MY",
        flag: "🇲🇾",
        name_en: "Malaysia",
        name_zh: "马来西亚",
        cjk_aliases: &["马来西亚", "马来"],
        latin_aliases: &["malaysia", "kuala lumpur"],
    },
    CountryEntry {
        code: "TH",
        flag: "🇹🇭",
        name_en: "Thailand",
        name_zh: "泰国",
        cjk_aliases: &["泰国", "曼谷"],
        latin_aliases: &["thailand", "bangkok", "th"],
    },
    CountryEntry {
        code: "VN",
        flag: "🇻🇳",
        name_en: "Vietnam",
        name_zh: "越南",
        cjk_aliases: &["越南"],
        latin_aliases: &["vietnam", "vn"],
    },
    CountryEntry {
        code: "PH",
        flag: "🇵🇭",
        name_en: "Philippines",
        name_zh: "菲律宾",
        cjk_aliases: &["菲律宾"],
        latin_aliases: &["philippines", "manila", "ph"],
    },
    CountryEntry {
        code: "ID",
        flag: "🇮🇩",
        name_en: "Indonesia",
        name_zh: "印尼",
        cjk_aliases: &["印尼", "雅加达"],
        latin_aliases: &["indonesia", "jakarta"],
    },
    CountryEntry {
        code: "BR",
        flag: "🇧🇷",
        name_en: "Brazil",
        name_zh: "巴西",
        cjk_aliases: &["巴西"],
        latin_aliases: &["brazil", "br"],
    },
    CountryEntry {
        code: "IT",
        flag: "🇮🇹",
        name_en: "Italy",
        name_zh: "意大利",
        cjk_aliases: &["意大利"],
        latin_aliases: &["italy", "milan"],
    },
    CountryEntry {
        code: "ES",
        flag: "🇪🇸",
        name_en: "Spain",
        name_zh: "西班牙",
        cjk_aliases: &["西班牙"],
        latin_aliases: &["spain", "madrid"],
    },
    CountryEntry {
        code: "CH",
        flag: "🇨🇭",
        name_en: "Switzerland",
        name_zh: "瑞士",
        cjk_aliases: &["瑞士"],
        latin_aliases: &["switzerland", "zurich", "ch"],
    },
    CountryEntry {
        code: "AE",
        flag: "🇦🇪",
        name_en: "United Arab Emirates",
        name_zh: "阿联酋",
        cjk_aliases: &["阿联酋", "迪拜"],
        latin_aliases: &["emirates", "dubai", "uae", "ae"],
    },
    CountryEntry {
        code: "MO",
        flag: "🇲🇴",
        name_en: "Macao",
        name_zh: "澳门",
        cjk_aliases: &["澳门", "澳門"],
        latin_aliases: &["macao", "macau", "mo"],
    },
    CountryEntry {
        code: "KZ",
        flag: "🇰🇿",
        name_en: "Kazakhstan",
        name_zh: "哈萨克斯坦",
        cjk_aliases: &["哈萨克"],
        latin_aliases: &["kazakhstan", "kz"],
    },
    CountryEntry {
        code: "UA",
        flag: "🇺🇦",
        name_en: "Ukraine",
        name_zh: "乌克兰",
        cjk_aliases: &["乌克兰"],
        latin_aliases: &["ukraine", "kyiv", "ua"],
    },
    CountryEntry {
        code: "PL",
        flag: "🇵🇱",
        name_en: "Poland",
        name_zh: "波兰",
        cjk_aliases: &["波兰"],
        latin_aliases: &["poland", "warsaw", "pl"],
    },
    CountryEntry {
        code: "SE",
        flag: "🇸🇪",
        name_en: "Sweden",
        name_zh: "瑞典",
        cjk_aliases: &["瑞典"],
        latin_aliases: &["sweden", "stockholm", "se"],
    },
    CountryEntry {
        code: "NO",
        flag: "🇳🇴",
        name_en: "Norway",
        name_zh: "挪威",
        cjk_aliases: &["挪威"],
        latin_aliases: &["norway", "oslo"],
    },
    CountryEntry {
        code: "FI",
        flag: "🇫🇮",
        name_en: "Finland",
        name_zh: "芬兰",
        cjk_aliases: &["芬兰"],
        latin_aliases: &["finland", "helsinki", "fi"],
    },
    CountryEntry {
        code: "AT",
        flag: "🇦🇹",
        name_en: "Austria",
        name_zh: "奥地利",
        cjk_aliases: &["奥地利"],
        latin_aliases: &["austria", "vienna"],
    },
    CountryEntry {
        code: "CZ",
        flag: "🇨🇿",
        name_en: "Czechia",
        name_zh: "捷克",
        cjk_aliases: &["捷克"],
        latin_aliases: &["czech", "prague", "cz"],
    },
    CountryEntry {
        code: "PT",
        flag: "🇵🇹",
        name_en: "Portugal",
        name_zh: "葡萄牙",
        cjk_aliases: &["葡萄牙"],
        latin_aliases: &["portugal", "lisbon", "pt"],
    },
    CountryEntry {
        code: "GR",
        flag: "🇬🇷",
        name_en: "Greece",
        name_zh: "希腊",
        cjk_aliases: &["希腊"],
        latin_aliases: &["greece", "athens", "gr"],
    },
    CountryEntry {
        code: "RO",
        flag: "🇷🇴",
        name_en: "Romania",
        name_zh: "罗马尼亚",
        cjk_aliases: &["罗马尼亚"],
        latin_aliases: &["romania", "bucharest", "ro"],
    },
    CountryEntry {
        code: "IL",
        flag: "🇮🇱",
        name_en: "Israel",
        name_zh: "以色列",
        cjk_aliases: &["以色列"],
        latin_aliases: &["israel", "tel aviv", "il"],
    },
    CountryEntry {
        code: "SA",
        flag: "🇸🇦",
        name_en: "Saudi Arabia",
        name_zh: "沙特阿拉伯",
        cjk_aliases: &["沙特"],
        latin_aliases: &["saudi", "riyadh", "sa"],
    },
    CountryEntry {
        code: "ZA",
        flag: "🇿🇦",
        name_en: "South Africa",
        name_zh: "南非",
        cjk_aliases: &["南非"],
        latin_aliases: &["south africa", "johannesburg", "za"],
    },
    CountryEntry {
        code: "MX",
        flag: "🇲🇽",
        name_en: "Mexico",
        name_zh: "墨西哥",
        cjk_aliases: &["墨西哥"],
        latin_aliases: &["mexico", "mx"],
    },
    CountryEntry {
        code: "AR",
        flag: "🇦🇷",
        name_en: "Argentina",
        name_zh: "阿根廷",
        cjk_aliases: &["阿根廷"],
        latin_aliases: &["argentina", "buenos aires", "ar"],
    },
    CountryEntry {
        code: "CL",
        flag: "🇨🇱",
        name_en: "Chile",
        name_zh: "智利",
        cjk_aliases: &["智利"],
        latin_aliases: &["chile", "santiago", "cl"],
    },
    CountryEntry {
        code: "NZ",
        flag: "🇳🇿",
        name_en: "New Zealand",
        name_zh: "新西兰",
        cjk_aliases: &["新西兰", "奥克兰"],
        latin_aliases: &["new zealand", "auckland", "nz"],
    },
];

/// Look up a country by its alpha-2 code
pub fn find_by_code(code: &str) -> Option<&'static CountryEntry> {
    let upper = code.to_uppercase();
    // UK is a common non-ISO spelling
    let upper = if upper == "UK" { "GB".to_string() } else { upper };
    COUNTRIES.iter().find(|entry| entry.code == upper)
}

fn latin_regex(entry: &CountryEntry) -> Regex {
    let alternation = entry
        .latin_aliases
        .iter()
        .map(|alias| regex::escape(alias))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)).expect("static alias pattern")
}

fn latin_matchers() -> &'static Vec<Regex> {
    static MATCHERS: OnceLock<Vec<Regex>> = OnceLock::new();
    MATCHERS.get_or_init(|| COUNTRIES.iter().map(latin_regex).collect())
}

/// Extract the country hinted at by a display name.
///
/// Earliest occurrence wins; on a position tie the longer match wins
/// (so `新西兰` is New Zealand, not the `新` Singapore shorthand), then
/// table order.
pub fn match_country(name: &str) -> Option<&'static CountryEntry> {
    let mut best: Option<(usize, usize, usize)> = None; // (position, match length, table index)

    for (index, entry) in COUNTRIES.iter().enumerate() {
        let mut found: Option<(usize, usize)> = None;
        let mut consider = |at: usize, len: usize| {
            if found.map_or(true, |(p, l)| at < p || (at == p && len > l)) {
                found = Some((at, len));
            }
        };
        if let Some(at) = name.find(entry.flag) {
            consider(at, entry.flag.len());
        }
        for alias in entry.cjk_aliases {
            if let Some(at) = name.find(alias) {
                consider(at, alias.len());
            }
        }
        if let Some(found_latin) = latin_matchers()[index].find(name) {
            consider(found_latin.start(), found_latin.len());
        }

        if let Some((at, len)) = found {
            if best.map_or(true, |(bp, bl, _)| at < bp || (at == bp && len > bl)) {
                best = Some((at, len, index));
            }
        }
    }

    best.map(|(_, _, index)| &COUNTRIES[index])
}
