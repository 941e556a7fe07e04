// ── Static key catalogue ──
//
// Declarative table of every key the client knows about: the group it
// belongs to and the kind of value it carries. Validation is a lookup in
// this table plus a kind comparison.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde_json::Value;
use strum::{AsRefStr, Display};

/// Where a key was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, AsRefStr)]
pub enum Group {
    Option,
    Setting,
    Status,
    Event,
    Program,
    Command,
}

impl Group {
    /// Infer the group from the key's own namespace
    /// (`BSH.Common.Status.DoorState` → `Status`).
    pub fn from_key(key: &str) -> Option<Self> {
        key.split('.').find_map(|segment| match segment {
            "Option" => Some(Self::Option),
            "Setting" => Some(Self::Setting),
            "Status" => Some(Self::Status),
            "Event" => Some(Self::Event),
            "Program" | "Root" => Some(Self::Program),
            "Command" => Some(Self::Command),
            _ => None,
        })
    }
}

/// A closed set of literals sharing one namespace prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumSpec {
    /// e.g. `BSH.Common.EnumType.DoorState`
    pub prefix: &'static str,
    pub values: &'static [&'static str],
}

impl EnumSpec {
    pub fn contains(&self, literal: &str) -> bool {
        literal
            .strip_prefix(self.prefix)
            .and_then(|rest| rest.strip_prefix('.'))
            .is_some_and(|value| self.values.contains(&value))
    }

    pub fn literals(&self) -> impl Iterator<Item = String> + '_ {
        self.values.iter().map(|v| format!("{}.{v}", self.prefix))
    }
}

/// Expected kind of a key's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Number,
    Boolean,
    Enum(EnumSpec),
    /// The key of a catalogued program.
    ProgramKey,
    /// No value, or a value that is never checked.
    Any,
}

impl ValueKind {
    /// Short name for logs and reports.
    pub fn describe(&self) -> String {
        match self {
            Self::String => "string".into(),
            Self::Number => "number".into(),
            Self::Boolean => "boolean".into(),
            Self::Enum(spec) => crate::registry::enum_type_name(&format!("{}.x", spec.prefix))
                .unwrap_or_else(|| spec.prefix.to_owned()),
            Self::ProgramKey => "program key".into(),
            Self::Any => "any".into(),
        }
    }
}

/// One catalogue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpec {
    pub key: &'static str,
    pub group: Group,
    pub kind: ValueKind,
}

/// Outcome of checking one value against a [`KeySpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueCheck {
    Ok,
    WrongType { expected: String },
    UnknownLiteral { literal: String },
}

// ── Catalogue ────────────────────────────────────────────────────────

/// Indexed view over a key table.
#[derive(Debug)]
pub struct Catalogue {
    groups: HashMap<Group, HashMap<&'static str, KeySpec>>,
}

impl Catalogue {
    pub fn new(specs: &[KeySpec]) -> Self {
        let mut groups: HashMap<Group, HashMap<&'static str, KeySpec>> = HashMap::new();
        for spec in specs {
            groups.entry(spec.group).or_default().insert(spec.key, *spec);
        }
        Self { groups }
    }

    /// The compiled-in table.
    pub fn builtin() -> &'static Catalogue {
        static BUILTIN: LazyLock<Catalogue> = LazyLock::new(|| Catalogue::new(KEYS));
        &BUILTIN
    }

    pub fn lookup(&self, group: Group, key: &str) -> Option<&KeySpec> {
        self.groups.get(&group)?.get(key)
    }

    pub fn is_program(&self, key: &str) -> bool {
        self.lookup(Group::Program, key)
            .is_some_and(|s| s.kind == ValueKind::Any)
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compare a value with the kind declared for its key.
    pub fn check_value(&self, spec: &KeySpec, value: &Value) -> ValueCheck {
        let wrong = || ValueCheck::WrongType {
            expected: spec.kind.describe(),
        };
        match spec.kind {
            ValueKind::Any => ValueCheck::Ok,
            ValueKind::String if value.is_string() => ValueCheck::Ok,
            ValueKind::Number if value.is_number() => ValueCheck::Ok,
            ValueKind::Boolean if value.is_boolean() => ValueCheck::Ok,
            ValueKind::Enum(enum_spec) => match value.as_str() {
                Some(literal) if enum_spec.contains(literal) => ValueCheck::Ok,
                Some(literal) => ValueCheck::UnknownLiteral {
                    literal: literal.to_owned(),
                },
                None => wrong(),
            },
            ValueKind::ProgramKey => match value.as_str() {
                Some(key) if self.is_program(key) => ValueCheck::Ok,
                Some(key) => ValueCheck::UnknownLiteral {
                    literal: key.to_owned(),
                },
                None => wrong(),
            },
            ValueKind::String | ValueKind::Number | ValueKind::Boolean => wrong(),
        }
    }
}

// ── Table ────────────────────────────────────────────────────────────

const fn spec(group: Group, key: &'static str, kind: ValueKind) -> KeySpec {
    KeySpec { key, group, kind }
}

const fn enumeration(prefix: &'static str, values: &'static [&'static str]) -> ValueKind {
    ValueKind::Enum(EnumSpec { prefix, values })
}

const OPERATION_STATE: ValueKind = enumeration(
    "BSH.Common.EnumType.OperationState",
    &[
        "Inactive",
        "Ready",
        "DelayedStart",
        "Run",
        "Pause",
        "ActionRequired",
        "Finished",
        "Error",
        "Aborting",
    ],
);
const DOOR_STATE: ValueKind =
    enumeration("BSH.Common.EnumType.DoorState", &["Open", "Closed", "Locked"]);
const POWER_STATE: ValueKind =
    enumeration("BSH.Common.EnumType.PowerState", &["Off", "On", "Standby"]);
const EVENT_PRESENT: ValueKind = enumeration(
    "BSH.Common.EnumType.EventPresentState",
    &["Present", "Off", "Confirmed"],
);
const AVAILABLE_MAPS: ValueKind = enumeration(
    "ConsumerProducts.CleaningRobot.EnumType.AvailableMaps",
    &["TempMap", "Map1", "Map2", "Map3"],
);

use Group::{Command, Event, Program, Setting, Status};
use ValueKind::{Any, Boolean, Number, ProgramKey};

/// Every key the client recognises.
pub static KEYS: &[KeySpec] = &[
    // Status
    spec(Status, "BSH.Common.Status.RemoteControlActive", Boolean),
    spec(Status, "BSH.Common.Status.RemoteControlStartAllowed", Boolean),
    spec(Status, "BSH.Common.Status.LocalControlActive", Boolean),
    spec(Status, "BSH.Common.Status.OperationState", OPERATION_STATE),
    spec(Status, "BSH.Common.Status.DoorState", DOOR_STATE),
    spec(Status, "BSH.Common.Status.BatteryLevel", Number),
    spec(
        Status,
        "BSH.Common.Status.BatteryChargingState",
        enumeration(
            "BSH.Common.EnumType.BatteryChargingState",
            &["Discharging", "Charging"],
        ),
    ),
    spec(
        Status,
        "BSH.Common.Status.ChargingConnection",
        enumeration(
            "BSH.Common.EnumType.ChargingConnection",
            &["Disconnected", "Connected"],
        ),
    ),
    spec(
        Status,
        "Refrigeration.Common.Status.Door.Refrigerator",
        DOOR_STATE,
    ),
    spec(Status, "Refrigeration.Common.Status.Door.Freezer", DOOR_STATE),
    spec(
        Status,
        "Cooking.Oven.Status.CurrentCavityTemperature",
        Number,
    ),
    spec(
        Status,
        "ConsumerProducts.CleaningRobot.Status.LastSelectedMap",
        AVAILABLE_MAPS,
    ),
    spec(
        Status,
        "ConsumerProducts.CleaningRobot.Status.DustBoxInserted",
        Boolean,
    ),
    spec(Status, "ConsumerProducts.CleaningRobot.Status.Lifted", Boolean),
    spec(Status, "ConsumerProducts.CleaningRobot.Status.Lost", Boolean),
    // Settings
    spec(Setting, "BSH.Common.Setting.PowerState", POWER_STATE),
    spec(
        Setting,
        "BSH.Common.Setting.TemperatureUnit",
        enumeration(
            "BSH.Common.EnumType.TemperatureUnit",
            &["Celsius", "Fahrenheit"],
        ),
    ),
    spec(
        Setting,
        "BSH.Common.Setting.LiquidVolumeUnit",
        enumeration(
            "BSH.Common.EnumType.LiquidVolumeUnit",
            &["FluidOunces", "Milliliters"],
        ),
    ),
    spec(Setting, "BSH.Common.Setting.ChildLock", Boolean),
    spec(Setting, "BSH.Common.Setting.AlarmClock", Number),
    spec(Setting, "BSH.Common.Setting.AmbientLightEnabled", Boolean),
    spec(Setting, "BSH.Common.Setting.AmbientLightBrightness", Number),
    spec(
        Setting,
        "BSH.Common.Setting.AmbientLightColor",
        enumeration(
            "BSH.Common.EnumType.AmbientLightColor",
            &["CustomColor", "Color1", "Color2", "Color3"],
        ),
    ),
    spec(
        Setting,
        "BSH.Common.Setting.AmbientLightCustomColor",
        ValueKind::String,
    ),
    spec(Setting, "Cooking.Common.Setting.Lighting", Boolean),
    spec(Setting, "Cooking.Common.Setting.LightingBrightness", Number),
    spec(
        Setting,
        "Refrigeration.FridgeFreezer.Setting.SetpointTemperatureRefrigerator",
        Number,
    ),
    spec(
        Setting,
        "Refrigeration.FridgeFreezer.Setting.SetpointTemperatureFreezer",
        Number,
    ),
    spec(
        Setting,
        "Refrigeration.FridgeFreezer.Setting.SuperModeRefrigerator",
        Boolean,
    ),
    spec(
        Setting,
        "Refrigeration.FridgeFreezer.Setting.SuperModeFreezer",
        Boolean,
    ),
    spec(Setting, "Refrigeration.Common.Setting.EcoMode", Boolean),
    spec(Setting, "Refrigeration.Common.Setting.VacationMode", Boolean),
    spec(Setting, "Refrigeration.Common.Setting.SabbathMode", Boolean),
    spec(
        Setting,
        "ConsumerProducts.CoffeeMaker.Setting.CupWarmer",
        Boolean,
    ),
    // Options
    spec(Group::Option, "BSH.Common.Option.RemainingProgramTime", Number),
    spec(
        Group::Option,
        "BSH.Common.Option.RemainingProgramTimeIsEstimated",
        Boolean,
    ),
    spec(Group::Option, "BSH.Common.Option.ElapsedProgramTime", Number),
    spec(Group::Option, "BSH.Common.Option.Duration", Number),
    spec(Group::Option, "BSH.Common.Option.StartInRelative", Number),
    spec(Group::Option, "BSH.Common.Option.FinishInRelative", Number),
    spec(Group::Option, "BSH.Common.Option.ProgramProgress", Number),
    spec(
        Group::Option,
        "BSH.Common.Option.EstimatedTotalProgramTime",
        Number,
    ),
    spec(Group::Option, "BSH.Common.Option.EnergyForecast", Number),
    spec(Group::Option, "BSH.Common.Option.WaterForecast", Number),
    spec(Group::Option, "Cooking.Oven.Option.SetpointTemperature", Number),
    spec(Group::Option, "Cooking.Oven.Option.FastPreHeat", Boolean),
    spec(
        Group::Option,
        "Cooking.Hood.Option.VentingLevel",
        enumeration(
            "Cooking.Hood.EnumType.Stage",
            &[
                "FanOff",
                "FanStage01",
                "FanStage02",
                "FanStage03",
                "FanStage04",
                "FanStage05",
            ],
        ),
    ),
    spec(
        Group::Option,
        "Cooking.Hood.Option.IntensiveLevel",
        enumeration(
            "Cooking.Hood.EnumType.IntensiveStage",
            &["IntensiveStageOff", "IntensiveStage1", "IntensiveStage2"],
        ),
    ),
    spec(Group::Option, "Dishcare.Dishwasher.Option.IntensivZone", Boolean),
    spec(Group::Option, "Dishcare.Dishwasher.Option.VarioSpeedPlus", Boolean),
    spec(Group::Option, "Dishcare.Dishwasher.Option.BrillianceDry", Boolean),
    spec(Group::Option, "Dishcare.Dishwasher.Option.HalfLoad", Boolean),
    spec(Group::Option, "Dishcare.Dishwasher.Option.ExtraDry", Boolean),
    spec(Group::Option, "Dishcare.Dishwasher.Option.HygienePlus", Boolean),
    spec(
        Group::Option,
        "Dishcare.Dishwasher.Option.SilenceOnDemand",
        Boolean,
    ),
    spec(
        Group::Option,
        "LaundryCare.Washer.Option.Temperature",
        enumeration(
            "LaundryCare.Washer.EnumType.Temperature",
            &[
                "Cold", "GC20", "GC30", "GC40", "GC50", "GC60", "GC70", "GC80", "GC90",
            ],
        ),
    ),
    spec(
        Group::Option,
        "LaundryCare.Washer.Option.SpinSpeed",
        enumeration(
            "LaundryCare.Washer.EnumType.SpinSpeed",
            &[
                "Off", "RPM400", "RPM600", "RPM800", "RPM1000", "RPM1200", "RPM1400", "RPM1600",
            ],
        ),
    ),
    spec(
        Group::Option,
        "LaundryCare.Dryer.Option.DryingTarget",
        enumeration(
            "LaundryCare.Dryer.EnumType.DryingTarget",
            &["IronDry", "CupboardDry", "CupboardDryPlus"],
        ),
    ),
    spec(
        Group::Option,
        "ConsumerProducts.CoffeeMaker.Option.BeanAmount",
        enumeration(
            "ConsumerProducts.CoffeeMaker.EnumType.BeanAmount",
            &[
                "VeryMild",
                "Mild",
                "Normal",
                "Strong",
                "VeryStrong",
                "DoubleShot",
            ],
        ),
    ),
    spec(
        Group::Option,
        "ConsumerProducts.CoffeeMaker.Option.FillQuantity",
        Number,
    ),
    spec(
        Group::Option,
        "ConsumerProducts.CoffeeMaker.Option.CoffeeTemperature",
        enumeration(
            "ConsumerProducts.CoffeeMaker.EnumType.CoffeeTemperature",
            &["88C", "90C", "92C", "94C", "95C", "96C"],
        ),
    ),
    spec(
        Group::Option,
        "ConsumerProducts.CleaningRobot.Option.CleaningMode",
        enumeration(
            "ConsumerProducts.CleaningRobot.EnumType.CleaningModes",
            &["Silent", "Standard", "Power"],
        ),
    ),
    spec(
        Group::Option,
        "ConsumerProducts.CleaningRobot.Option.ReferenceMapId",
        AVAILABLE_MAPS,
    ),
    // Events
    spec(Event, "BSH.Common.Event.ProgramFinished", EVENT_PRESENT),
    spec(Event, "BSH.Common.Event.ProgramAborted", EVENT_PRESENT),
    spec(Event, "BSH.Common.Event.AlarmClockElapsed", EVENT_PRESENT),
    spec(Event, "Cooking.Oven.Event.PreheatFinished", EVENT_PRESENT),
    spec(
        Event,
        "Dishcare.Dishwasher.Event.RinseAidNearlyEmpty",
        EVENT_PRESENT,
    ),
    spec(Event, "Dishcare.Dishwasher.Event.SaltNearlyEmpty", EVENT_PRESENT),
    spec(
        Event,
        "Refrigeration.FridgeFreezer.Event.DoorAlarmFreezer",
        EVENT_PRESENT,
    ),
    spec(
        Event,
        "Refrigeration.FridgeFreezer.Event.DoorAlarmRefrigerator",
        EVENT_PRESENT,
    ),
    spec(
        Event,
        "Refrigeration.FridgeFreezer.Event.TemperatureAlarmFreezer",
        EVENT_PRESENT,
    ),
    spec(
        Event,
        "ConsumerProducts.CoffeeMaker.Event.BeanContainerEmpty",
        EVENT_PRESENT,
    ),
    spec(
        Event,
        "ConsumerProducts.CoffeeMaker.Event.WaterTankEmpty",
        EVENT_PRESENT,
    ),
    spec(
        Event,
        "ConsumerProducts.CoffeeMaker.Event.DripTrayFull",
        EVENT_PRESENT,
    ),
    spec(
        Event,
        "LaundryCare.Common.Event.IDos1FillLevelPoor",
        EVENT_PRESENT,
    ),
    spec(Event, "BSH.Common.Appliance.Connected", Boolean),
    spec(Event, "BSH.Common.Appliance.Disconnected", Boolean),
    spec(Event, "BSH.Common.Appliance.Paired", Boolean),
    spec(Event, "BSH.Common.Appliance.Depaired", Boolean),
    // Programs
    spec(Program, "BSH.Common.Root.ActiveProgram", ProgramKey),
    spec(Program, "BSH.Common.Root.SelectedProgram", ProgramKey),
    spec(Program, "Dishcare.Dishwasher.Program.Auto2", Any),
    spec(Program, "Dishcare.Dishwasher.Program.Eco50", Any),
    spec(Program, "Dishcare.Dishwasher.Program.Intensiv70", Any),
    spec(Program, "Dishcare.Dishwasher.Program.Quick45", Any),
    spec(Program, "Dishcare.Dishwasher.Program.PreRinse", Any),
    spec(Program, "Dishcare.Dishwasher.Program.NightWash", Any),
    spec(Program, "Dishcare.Dishwasher.Program.Glas40", Any),
    spec(Program, "LaundryCare.Washer.Program.Cotton", Any),
    spec(Program, "LaundryCare.Washer.Program.EasyCare", Any),
    spec(Program, "LaundryCare.Washer.Program.Mix", Any),
    spec(Program, "LaundryCare.Washer.Program.DelicatesSilk", Any),
    spec(Program, "LaundryCare.Washer.Program.Wool", Any),
    spec(Program, "LaundryCare.Dryer.Program.Cotton", Any),
    spec(Program, "LaundryCare.Dryer.Program.Synthetic", Any),
    spec(Program, "LaundryCare.Dryer.Program.Mix", Any),
    spec(Program, "Cooking.Oven.Program.HeatingMode.HotAir", Any),
    spec(Program, "Cooking.Oven.Program.HeatingMode.TopBottomHeating", Any),
    spec(Program, "Cooking.Oven.Program.HeatingMode.PizzaSetting", Any),
    spec(Program, "Cooking.Oven.Program.HeatingMode.PreHeating", Any),
    spec(Program, "Cooking.Hood.Program.Automatic", Any),
    spec(Program, "Cooking.Hood.Program.Venting", Any),
    spec(Program, "Cooking.Hood.Program.DelayedShutOff", Any),
    spec(Program, "ConsumerProducts.CoffeeMaker.Program.Beverage.Espresso", Any),
    spec(Program, "ConsumerProducts.CoffeeMaker.Program.Beverage.Coffee", Any),
    spec(
        Program,
        "ConsumerProducts.CoffeeMaker.Program.Beverage.Cappuccino",
        Any,
    ),
    spec(
        Program,
        "ConsumerProducts.CoffeeMaker.Program.Beverage.LatteMacchiato",
        Any,
    ),
    spec(
        Program,
        "ConsumerProducts.CoffeeMaker.Program.Beverage.CaffeLatte",
        Any,
    ),
    spec(
        Program,
        "ConsumerProducts.CleaningRobot.Program.Cleaning.CleanAll",
        Any,
    ),
    spec(
        Program,
        "ConsumerProducts.CleaningRobot.Program.Basic.GoHome",
        Any,
    ),
    // Commands
    spec(Command, "BSH.Common.Command.PauseProgram", Boolean),
    spec(Command, "BSH.Common.Command.ResumeProgram", Boolean),
    spec(Command, "BSH.Common.Command.OpenDoor", Boolean),
    spec(Command, "BSH.Common.Command.PartlyOpenDoor", Boolean),
    spec(Command, "BSH.Common.Command.AcknowledgeEvent", Boolean),
];
