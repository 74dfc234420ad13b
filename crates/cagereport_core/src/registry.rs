use std::fmt;

use serde::Serialize;

/// One of the two daily reporting periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Shift {
    One,
    Two,
}

impl Shift {
    pub const ALL: [Shift; 2] = [Shift::One, Shift::Two];

    pub fn number(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::One => Self::Two,
            Self::Two => Self::One,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "1" => Some(Self::One),
            "2" => Some(Self::Two),
            _ => None,
        }
    }
}

impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// A named place whose cages share aggregate totals in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Group {
    pub name: &'static str,
    pub code: &'static str,
    pub cages: &'static [u32],
    /// Template slots that do not follow `<code><role letter>`, as the token
    /// body without shift digit or parentheses.
    pub irregular: &'static [(GroupRole, &'static str)],
}

/// Role letter appended to a group token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRole {
    Total,
    Myna,
    Local,
}

impl GroupRole {
    pub const ALL: [GroupRole; 3] = [GroupRole::Total, GroupRole::Myna, GroupRole::Local];

    fn letter(self) -> char {
        match self {
            Self::Total => 't',
            Self::Myna => 'm',
            Self::Local => 'l',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignBoundary {
    Start,
    End,
}

pub const DATE_TOKEN: &str = "(date)";
pub const DATE_WITH_MONTH_TOKEN: &str = "(date_with_month)";

pub const GROUPS: &[Group] = &[
    Group {
        name: "Southern Promenade",
        code: "sp",
        cages: &[
            458, 459, 460, 461, 462, 463, 464, 465, 466, 467, 468, 469, 470, 471, 472, 473, 474,
        ],
        irregular: &[(GroupRole::Total, "sp_total")],
    },
    Group {
        name: "Eastern Promenade",
        code: "ep",
        cages: &[475, 476, 477, 478, 526, 527, 528, 530, 531],
        irregular: &[],
    },
    Group {
        name: "U-shape East & West Wing",
        code: "use",
        cages: &[484, 485, 486, 487, 488, 489, 490, 491, 492, 501, 502, 505],
        irregular: &[],
    },
    Group {
        name: "Marina Carpark 2A",
        code: "mc2a",
        cages: &[506, 507, 508, 510],
        irregular: &[],
    },
    Group {
        name: "Marina Carpark 2B",
        code: "mc2b",
        cages: &[493, 494, 495],
        irregular: &[],
    },
    Group {
        name: "Northern Promenade",
        code: "np",
        cages: &[512, 513],
        irregular: &[],
    },
    Group {
        name: "QD Complex (External)",
        code: "qdce",
        cages: &[496, 497, 498, 499, 500, 504, 509],
        irregular: &[(GroupRole::Myna, "qdcetm"), (GroupRole::Local, "qdcetl")],
    },
    Group {
        name: "Crescent Park 01",
        code: "cp1",
        cages: &[523, 524, 525, 540, 541, 542, 543, 544, 545, 546, 547],
        irregular: &[],
    },
    Group {
        name: "Crescent Park 02",
        code: "cp2",
        cages: &[479, 480, 481, 482, 483],
        irregular: &[],
    },
    Group {
        name: "Crescent Park 03",
        code: "cp3",
        cages: &[514, 516, 517, 518, 519, 520, 521, 522],
        irregular: &[],
    },
    Group {
        name: "Crescent Park 04",
        code: "cp4",
        cages: &[503, 511, 532, 533, 534, 535, 536, 537, 538, 539],
        irregular: &[],
    },
    Group {
        name: "Crescent Park 05",
        code: "cp5",
        cages: &[
            549, 550, 551, 552, 553, 554, 555, 556, 557, 558, 559, 560, 561, 562, 563, 564,
        ],
        irregular: &[],
    },
    Group {
        name: "Al Khuzama Zone -2",
        code: "akz2",
        cages: &[
            604, 605, 606, 607, 608, 609, 610, 611, 612, 613, 614, 615, 617, 618, 619, 620,
        ],
        irregular: &[],
    },
    Group {
        name: "Al Khuzama Zone -1",
        code: "akz1",
        cages: &[
            588, 589, 590, 591, 592, 593, 594, 595, 596, 597, 598, 599, 600, 601, 602, 603,
        ],
        irregular: &[],
    },
    Group {
        name: "Al Nafel Park",
        code: "anp",
        cages: &[577, 578, 579, 580, 581],
        irregular: &[],
    },
    Group {
        name: "QETAIFAN ZONE 1",
        code: "qz1",
        cages: &[569, 570, 574, 575],
        irregular: &[],
    },
    Group {
        name: "QETAIFAN ZONE 2",
        code: "qz2",
        cages: &[567, 572, 573, 576],
        irregular: &[],
    },
    Group {
        name: "QETAIFAN ZONE 3",
        code: "qz3",
        cages: &[565, 566, 568],
        irregular: &[],
    },
    Group {
        name: "Qetaifan North Park",
        code: "qnp",
        cages: &[623, 624, 625, 626, 630, 631, 632, 633, 634],
        irregular: &[],
    },
    Group {
        name: "Road A1 - Al Khuzama",
        code: "raak",
        cages: &[621, 622, 627, 628, 629],
        irregular: &[],
    },
    Group {
        name: "Seef Lusail North",
        code: "sln",
        cages: &[635, 636, 637, 638, 639, 640, 641, 642],
        irregular: &[],
    },
];

pub fn group_for_cage(cage: u32) -> Option<&'static Group> {
    GROUPS.iter().find(|group| group.cages.contains(&cage))
}

pub fn all_cages() -> impl Iterator<Item = u32> {
    GROUPS.iter().flat_map(|group| group.cages.iter().copied())
}

pub fn cage_token(shift: Shift, cage: u32) -> String {
    format!("({shift}c{cage})")
}

pub fn group_token(shift: Shift, group: &Group, role: GroupRole) -> String {
    match group.irregular.iter().find(|(slot, _)| *slot == role) {
        Some((_, body)) => format!("({shift}{body})"),
        None => format!("({shift}{}{})", group.code, role.letter()),
    }
}

pub fn photo_token(cage: &str) -> String {
    format!("(pic_{cage})")
}

pub fn sign_token(shift: Shift, boundary: SignBoundary) -> String {
    let suffix = match boundary {
        SignBoundary::Start => "signin",
        SignBoundary::End => "signout",
    };
    format!("(shift_{shift}_{suffix})")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn every_text_token() -> Vec<String> {
        let mut tokens = vec![DATE_TOKEN.to_string(), DATE_WITH_MONTH_TOKEN.to_string()];
        for shift in Shift::ALL {
            for group in GROUPS {
                for cage in group.cages {
                    tokens.push(cage_token(shift, *cage));
                }
                for role in GroupRole::ALL {
                    tokens.push(group_token(shift, group, role));
                }
            }
        }
        tokens
    }

    #[test]
    fn cages_are_registered_once() {
        let mut seen = BTreeSet::new();
        for cage in all_cages() {
            assert!(seen.insert(cage), "cage {cage} registered twice");
        }
    }

    #[test]
    fn group_codes_are_unique() {
        let codes = GROUPS.iter().map(|group| group.code).collect::<BTreeSet<_>>();
        assert_eq!(codes.len(), GROUPS.len());
    }

    #[test]
    fn no_token_contains_another() {
        let tokens = every_text_token();
        for irregular in ["(1sp_total)", "(2sp_total)", "(2qdcetm)", "(2qdcetl)"] {
            assert!(tokens.iter().any(|token| token == irregular), "{irregular} not emitted");
        }
        let unique = tokens.iter().collect::<BTreeSet<_>>();
        assert_eq!(unique.len(), tokens.len());
        for (index, left) in tokens.iter().enumerate() {
            for (other, right) in tokens.iter().enumerate() {
                if index != other {
                    assert!(!left.contains(right.as_str()), "{left} contains {right}");
                }
            }
        }
    }

    #[test]
    fn token_shapes_follow_grammar() {
        let group = group_for_cage(588).expect("registered cage");
        assert_eq!(group.code, "akz1");
        assert_eq!(cage_token(Shift::One, 588), "(1c588)");
        assert_eq!(group_token(Shift::Two, group, GroupRole::Total), "(2akz1t)");
        assert_eq!(group_token(Shift::One, group, GroupRole::Local), "(1akz1l)");
        assert_eq!(photo_token("588"), "(pic_588)");

        let promenade = group_for_cage(458).expect("registered cage");
        assert_eq!(group_token(Shift::Two, promenade, GroupRole::Total), "(2sp_total)");
        assert_eq!(group_token(Shift::One, promenade, GroupRole::Total), "(1sp_total)");
        assert_eq!(group_token(Shift::Two, promenade, GroupRole::Myna), "(2spm)");
        let complex = group_for_cage(496).expect("registered cage");
        assert_eq!(group_token(Shift::Two, complex, GroupRole::Total), "(2qdcet)");
        assert_eq!(group_token(Shift::Two, complex, GroupRole::Myna), "(2qdcetm)");
        assert_eq!(group_token(Shift::Two, complex, GroupRole::Local), "(2qdcetl)");
        assert_eq!(sign_token(Shift::Two, SignBoundary::End), "(shift_2_signout)");
    }

    #[test]
    fn shift_parses_trimmed_digits_only() {
        assert_eq!(Shift::parse(" 2 "), Some(Shift::Two));
        assert_eq!(Shift::parse("3"), None);
        assert_eq!(Shift::One.opposite(), Shift::Two);
    }
}
