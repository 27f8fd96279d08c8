//! Unit and metric-prefix annotation tables.

macro_rules! name_table {
    ($(#[$doc:meta])* $enum_name:ident { $($variant:ident = $val:expr => ($name:literal, $symbol:literal)),+ $(,)? }) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(i32)]
        pub enum $enum_name {
            $($variant = $val),+
        }

        impl $enum_name {
            pub fn from_i32(raw: i32) -> Option<Self> {
                match raw {
                    $($val => Some($enum_name::$variant),)+
                    _ => None,
                }
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $($enum_name::$variant => $name),+
                }
            }

            pub fn symbol(&self) -> &'static str {
                match self {
                    $($enum_name::$variant => $symbol),+
                }
            }
        }
    };
}

name_table! {
    /// Physical unit of a parameter, stored as the `unitEnum` attribute.
    Unit {
        Number = 0 => ("number", ""),
        Meter = 1 => ("meter", "m"),
        Gram = 2 => ("gram", "g"),
        Second = 3 => ("second", "s"),
        Ampere = 4 => ("ampere", "A"),
        Kelvin = 5 => ("kelvin", "K"),
        Mole = 6 => ("mole", "mol"),
        Candela = 7 => ("candela", "cd"),
        Hertz = 8 => ("hertz", "Hz"),
        Radian = 9 => ("radian", "rad"),
        Newton = 10 => ("newton", "N"),
        Pascal = 11 => ("pascal", "Pa"),
        Joule = 12 => ("joule", "J"),
        Watt = 13 => ("watt", "W"),
        Coulomb = 14 => ("coulomb", "C"),
        Volt = 15 => ("volt", "V"),
        Farad = 16 => ("farad", "F"),
        Ohm = 17 => ("ohm", "Ω"),
        Siemens = 18 => ("siemens", "S"),
        Weber = 19 => ("weber", "Wb"),
        Tesla = 20 => ("tesla", "T"),
        Henry = 21 => ("henry", "H"),
        DegreeCelsius = 22 => ("degree_celsius", "°C"),
        Lumen = 23 => ("lumen", "lm"),
        Lux = 24 => ("lux", "lx"),
        Becquerel = 25 => ("becquerel", "Bq"),
        Gray = 26 => ("gray", "Gy"),
        Sievert = 27 => ("sievert", "Sv"),
        Katal = 28 => ("katal", "kat"),
        Minute = 29 => ("minute", "min"),
        Hour = 30 => ("hour", "h"),
        Day = 31 => ("day", "d"),
        Year = 32 => ("year", "a"),
        Bar = 33 => ("bar", "bar"),
        Pixel = 34 => ("pixel", "px"),
        Byte = 35 => ("byte", "B"),
        Bit = 36 => ("bit", "bit"),
        Percent = 37 => ("percent", "%"),
        Count = 38 => ("count", "#"),
    }
}

name_table! {
    /// Decimal prefix of a unit, stored as the `metricPrefixEnum` attribute.
    MetricPrefix {
        Yotta = 0 => ("yotta", "Y"),
        Zetta = 1 => ("zetta", "Z"),
        Exa = 2 => ("exa", "E"),
        Peta = 3 => ("peta", "P"),
        Tera = 4 => ("tera", "T"),
        Giga = 5 => ("giga", "G"),
        Mega = 6 => ("mega", "M"),
        Kilo = 7 => ("kilo", "k"),
        Hecto = 8 => ("hecto", "h"),
        Deca = 9 => ("deca", "da"),
        None = 10 => ("", ""),
        Deci = 11 => ("deci", "d"),
        Centi = 12 => ("centi", "c"),
        Milli = 13 => ("milli", "m"),
        Micro = 14 => ("micro", "u"),
        Nano = 15 => ("nano", "n"),
        Pico = 16 => ("pico", "p"),
        Femto = 17 => ("femto", "f"),
        Atto = 18 => ("atto", "a"),
        Zepto = 19 => ("zepto", "z"),
        Yocto = 20 => ("yocto", "y"),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tables_are_consistent() {
        assert_eq!(Unit::from_i32(Unit::Volt as i32), Some(Unit::Volt));
        assert_eq!(Unit::Volt.symbol(), "V");
        assert_eq!(MetricPrefix::Milli.symbol(), "m");
        assert_eq!(MetricPrefix::from_i32(99), None);
    }
}
